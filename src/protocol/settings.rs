//! Editable-settings registry.
//!
//! Every job declares, at construction, the ordered set of attributes that
//! outsiders may read and set over the bus. The registry owns the current
//! values and performs the type coercion for incoming text payloads: the
//! payload is parsed as the same semantic type as the current value, and
//! stored as raw text if that fails. Publishing on mutation is the job
//! core's responsibility — the registry reports the old value so the core
//! can log and republish through its single observation point.

/// Current value of one editable setting.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Float(f64),
    Text(String),
}

impl SettingValue {
    /// Coerce an incoming text payload to this value's semantic type,
    /// falling back to raw text on parse failure. The fallback is a
    /// deliberate leniency, not an error.
    fn coerce(&self, raw: &str) -> SettingValue {
        match self {
            Self::Float(_) => raw
                .trim()
                .parse::<f64>()
                .map_or_else(|_| Self::Text(raw.to_string()), Self::Float),
            Self::Text(_) => Self::Text(raw.to_string()),
        }
    }

    /// Numeric view, when the value is (still) numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Ordered set of editable settings for one job.
pub struct SettingsRegistry {
    entries: Vec<(String, SettingValue)>,
}

impl SettingsRegistry {
    /// Build from the declared (name, initial value) pairs. Declaration
    /// order is preserved in `$properties`.
    pub fn new(entries: Vec<(&str, SettingValue)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(n, v)| (n.to_string(), v))
                .collect(),
        }
    }

    /// Declared names in declaration order. `state` is appended by the job
    /// core, which tracks it in the lifecycle machine rather than here.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Numeric read of a setting; `None` if undeclared or currently text.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(SettingValue::as_f64)
    }

    /// Replace a setting from in-process code. Returns the old value, or
    /// `None` if the name is not declared.
    pub fn set(&mut self, name: &str, value: SettingValue) -> Option<SettingValue> {
        let slot = self.entries.iter_mut().find(|(n, _)| n == name)?;
        Some(std::mem::replace(&mut slot.1, value))
    }

    /// Apply an external text payload with type coercion. Returns
    /// `(old, new)` on success, `None` if the name is not declared.
    pub fn update_from_text(&mut self, name: &str, raw: &str) -> Option<(SettingValue, SettingValue)> {
        let slot = self.entries.iter_mut().find(|(n, _)| n == name)?;
        let new = slot.1.coerce(raw);
        let old = std::mem::replace(&mut slot.1, new.clone());
        Some((old, new))
    }
}
