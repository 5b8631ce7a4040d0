use embedded_svc::http::client::Client as HttpClient;
use embedded_svc::http::{Method, Status};
use embedded_svc::io::Write;
use esp_idf_svc::http::client::{Configuration as HttpClientConfiguration, EspHttpConnection};
use log::{debug, warn};

use crate::config::HTTP_TIMEOUT;
use crate::rest::PostgrestQuery;
use crate::telemetry::{RemoteStore, CONNECTION_FAILURE};

/// Transfer failed after the connection was opened.
pub const TRANSFER_FAILURE: i32 = -11;

/// Supabase PostgREST over HTTPS, one connection per request.
pub struct SupabaseStore {
    base_url: String,
    api_key: String,
    query: PostgrestQuery,
}

impl SupabaseStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            query: PostgrestQuery::new(),
        }
    }

    fn execute(&self) -> i32 {
        let (Some(url), Some(body)) = (self.query.url(&self.base_url), self.query.body()) else {
            warn!("[HTTP] Empty query, nothing to send");
            return CONNECTION_FAILURE;
        };

        let http_conf = HttpClientConfiguration {
            timeout: Some(HTTP_TIMEOUT),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let connection = match EspHttpConnection::new(&http_conf) {
            Ok(conn) => conn,
            Err(err) => {
                warn!("[HTTP] Client init failed: {err}");
                return CONNECTION_FAILURE;
            }
        };
        let mut client = HttpClient::wrap(connection);

        let content_length = body.len().to_string();
        let owned = self.query.headers(&self.api_key);
        let mut headers: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (*k, v.as_str())).collect();
        headers.push(("Content-Length", content_length.as_str()));

        let mut request = match client.request(Method::Post, &url, &headers) {
            Ok(request) => request,
            Err(err) => {
                warn!("[HTTP] Connect to {url} failed: {err:?}");
                return CONNECTION_FAILURE;
            }
        };
        if let Err(err) = request.write_all(body.as_bytes()) {
            warn!("[HTTP] Body write failed: {err:?}");
            return TRANSFER_FAILURE;
        }
        match request.submit() {
            Ok(response) => {
                let status = response.status();
                debug!("[HTTP] POST {url} -> {status}");
                i32::from(status)
            }
            Err(err) => {
                warn!("[HTTP] No response: {err:?}");
                TRANSFER_FAILURE
            }
        }
    }
}

impl RemoteStore for SupabaseStore {
    fn insert(&mut self, table: &str, json_payload: &str, upsert: bool) -> i32 {
        self.query.insert(table, json_payload, upsert);
        self.execute()
    }

    fn reset_query(&mut self) {
        self.query.reset();
    }
}
