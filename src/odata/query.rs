//! `$top`, `$skip` and `$orderby` modifiers

/// Query options for OData requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub top: Option<u32>,
    pub skip: Option<u32>,
    /// Full ordering expression, e.g. `"No desc"`.
    pub order_by: Option<String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_top(mut self, top: u32) -> Self {
        self.top = Some(top);
        self
    }

    pub fn with_skip(mut self, skip: u32) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn order_by_asc(mut self, field: &str) -> Self {
        self.order_by = Some(format!("{} asc", field));
        self
    }

    pub fn order_by_desc(mut self, field: &str) -> Self {
        self.order_by = Some(format!("{} desc", field));
        self
    }

    /// Set a raw ordering expression such as `"Document_Type asc,No desc"`.
    pub fn with_order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by = Some(expr.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_options_empty() {
        let options = QueryOptions::default();
        assert_eq!(options.top, None);
        assert_eq!(options.skip, None);
        assert_eq!(options.order_by, None);
    }

    #[test]
    fn test_fluent_setters() {
        let options = QueryOptions::new().with_top(50).with_skip(100).order_by_asc("No");
        assert_eq!(options.top, Some(50));
        assert_eq!(options.skip, Some(100));
        assert_eq!(options.order_by.as_deref(), Some("No asc"));
    }

    #[test]
    fn test_last_order_by_wins() {
        let options = QueryOptions::new()
            .order_by_asc("No")
            .order_by_desc("Posting_Date");
        assert_eq!(options.order_by.as_deref(), Some("Posting_Date desc"));

        let options = options.with_order_by("Amount asc,No desc");
        assert_eq!(options.order_by.as_deref(), Some("Amount asc,No desc"));
    }
}
