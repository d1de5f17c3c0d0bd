use common::err::ReError;
pub use common::config::GroupMode;
use regex::Regex;

/// A named collection of nodes/subscribers sharing a delivery mode and a
/// set of table-name filters. A record matches iff at
/// least one filter matches `table`, or the filter list is empty.
pub struct Group {
    pub name: String,
    pub mode: GroupMode,
    filters: Vec<Regex>,
}

impl Group {
    pub fn new(name: impl Into<String>, mode: GroupMode, filter_patterns: &[String]) -> Result<Self, ReError> {
        let filters = filter_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| ReError::ConfigFileParseErr(format!("invalid filter regex '{p}': {e}"))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.into(),
            mode,
            filters,
        })
    }

    /// Empty filter list matches everything.
    pub fn matches(&self, table: &str) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.is_match(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_list_matches_everything() {
        let group = Group::new("g", GroupMode::Broadcast, &[]).unwrap();
        assert!(group.matches("anything"));
    }

    #[test]
    fn matches_iff_some_filter_matches() {
        let group = Group::new("g", GroupMode::Broadcast, &["^orders_.*".to_string()]).unwrap();
        assert!(group.matches("orders_2024"));
        assert!(!group.matches("users"));
    }

    #[test]
    fn rejects_invalid_regex() {
        assert!(Group::new("g", GroupMode::Broadcast, &["(".to_string()]).is_err());
    }
}
