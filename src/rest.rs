//! PostgREST request shape for Supabase table inserts.

/// Per-request state of one insert. `reset` returns it to empty between requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostgrestQuery {
    table: Option<String>,
    upsert: bool,
    body: Option<String>,
}

impl PostgrestQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: &str, json_payload: &str, upsert: bool) -> &mut Self {
        self.table = Some(table.to_string());
        self.body = Some(json_payload.to_string());
        self.upsert = upsert;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_none() && self.body.is_none()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// `{base}/rest/v1/{table}`, or `None` before `insert`.
    pub fn url(&self, base_url: &str) -> Option<String> {
        let table = self.table.as_deref()?;
        Some(format!("{}/rest/v1/{table}", base_url.trim_end_matches('/')))
    }

    pub fn headers(&self, api_key: &str) -> Vec<(&'static str, String)> {
        let prefer = if self.upsert {
            "return=minimal,resolution=merge-duplicates"
        } else {
            "return=minimal"
        };
        vec![
            ("apikey", api_key.to_string()),
            ("Authorization", format!("Bearer {api_key}")),
            ("Content-Type", "application/json".to_string()),
            ("Prefer", prefer.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_table_url() {
        let mut q = PostgrestQuery::new();
        assert_eq!(q.url("https://abc.supabase.co"), None);

        q.insert("sensor_readings", "{}", false);
        assert_eq!(
            q.url("https://abc.supabase.co/").as_deref(),
            Some("https://abc.supabase.co/rest/v1/sensor_readings")
        );
        assert_eq!(q.body(), Some("{}"));
    }

    #[test]
    fn upsert_asks_for_merge() {
        let mut q = PostgrestQuery::new();
        q.insert("t", "{}", true);
        let headers = q.headers("key");
        assert!(headers.contains(&("Authorization", "Bearer key".to_string())));
        assert!(headers.contains(&(
            "Prefer",
            "return=minimal,resolution=merge-duplicates".to_string()
        )));

        q.insert("t", "{}", false);
        assert!(q.headers("key").contains(&("Prefer", "return=minimal".to_string())));
    }

    #[test]
    fn reset_clears_state() {
        let mut q = PostgrestQuery::new();
        q.insert("t", "{}", true);
        assert!(!q.is_empty());
        q.reset();
        assert!(q.is_empty());
        assert_eq!(q, PostgrestQuery::default());
    }
}
