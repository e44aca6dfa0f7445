//! Supabase-backed remote client (PostgREST rows + Storage blobs).

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use crate::config::RemoteConfig;
use crate::models::{RecordId, UserId};
use crate::util::compact_text;

use super::{
    BlobRef, RemoteClient, RemoteError, RemoteRecord, RemoteResult, RemoteRow, PREDICTIONS_TABLE,
};

/// HTTP client for one signed-in user's view of the Supabase project.
#[derive(Clone)]
pub struct SupabaseRemote {
    rest_url: String,
    storage_url: String,
    bucket: String,
    anon_key: String,
    access_token: String,
    client: Client,
}

impl fmt::Debug for SupabaseRemote {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SupabaseRemote")
            .field("rest_url", &self.rest_url)
            .field("storage_url", &self.storage_url)
            .field("bucket", &self.bucket)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl SupabaseRemote {
    pub fn new(config: &RemoteConfig, access_token: impl Into<String>) -> RemoteResult<Self> {
        let access_token = access_token.into().trim().to_string();
        if access_token.is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "access token must not be empty".to_string(),
            ));
        }

        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            rest_url: config.rest_url(),
            storage_url: config.storage_url(),
            bucket: config.storage_bucket.clone(),
            anon_key: config.supabase_anon_key.clone(),
            access_token,
            client,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.access_token)
    }

    fn table_url(&self) -> String {
        format!("{}/{PREDICTIONS_TABLE}", self.rest_url)
    }

    fn object_url(&self, scope: Option<&str>, path: &str) -> String {
        let encoded = encode_object_path(path);
        match scope {
            Some(scope) => format!(
                "{}/object/{scope}/{}/{encoded}",
                self.storage_url, self.bucket
            ),
            None => format!("{}/object/{}/{encoded}", self.storage_url, self.bucket),
        }
    }

    async fn fetch_rows<T: for<'de> Deserialize<'de>>(
        &self,
        query: &[(&str, String)],
    ) -> RemoteResult<Vec<T>> {
        let response = self
            .authorized(self.client.get(self.table_url()))
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|error| RemoteError::InvalidPayload(format!("{error}: {}", compact_text(&body))))
    }
}

impl RemoteClient for SupabaseRemote {
    async fn insert(&self, rows: &[RemoteRow]) -> RemoteResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let response = self
            .authorized(self.client.post(self.table_url()))
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        tracing::debug!("Inserted {} rows into {}", rows.len(), PREDICTIONS_TABLE);
        Ok(())
    }

    async fn query_created_after(
        &self,
        user_id: &UserId,
        cursor: DateTime<Utc>,
    ) -> RemoteResult<Vec<RemoteRecord>> {
        let cursor = cursor.to_rfc3339_opts(SecondsFormat::Micros, true);
        self.fetch_rows(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("created_at", format!("gt.{cursor}")),
        ])
        .await
    }

    async fn existing_ids(
        &self,
        user_id: &UserId,
        ids: &[RecordId],
    ) -> RemoteResult<HashSet<RecordId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        #[derive(Deserialize)]
        struct IdRow {
            id: RecordId,
        }

        let rows: Vec<IdRow> = self
            .fetch_rows(&[
                ("select", "id".to_string()),
                ("user_id", format!("eq.{user_id}")),
                ("id", in_filter(ids)),
            ])
            .await?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    async fn upload_blob(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> RemoteResult<BlobRef> {
        let path = normalize_object_path(path)?;
        let response = self
            .authorized(self.client.post(self.object_url(None, &path)))
            .header("x-upsert", "false")
            .header("Content-Type", content_type)
            .header("Cache-Control", "max-age=3600")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if is_duplicate_response(status, &body) {
                return Err(RemoteError::Conflict(path));
            }
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        tracing::debug!("Uploaded blob {}/{}", self.bucket, path);
        Ok(BlobRef::new(path))
    }

    async fn blob_exists(&self, path: &str) -> RemoteResult<bool> {
        let path = normalize_object_path(path)?;
        let response = self
            .authorized(self.client.head(self.object_url(Some("authenticated"), &path)))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            // Storage reports missing objects as 400 on some versions.
            Ok(false)
        } else {
            Err(RemoteError::Api(format!(
                "blob existence check failed for '{path}' (HTTP {})",
                status.as_u16()
            )))
        }
    }

    fn public_url(&self, blob: &BlobRef) -> String {
        self.object_url(Some("public"), blob.path())
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
    #[serde(rename = "statusCode")]
    status_code: Option<serde_json::Value>,
}

/// Human-readable message for a failed Supabase response (auth, rest or storage).
pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<SupabaseErrorResponse>(body) {
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn is_duplicate_response(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::CONFLICT {
        return true;
    }

    let Ok(payload) = serde_json::from_str::<SupabaseErrorResponse>(body) else {
        return false;
    };
    let status_code_conflict = payload.status_code.as_ref().is_some_and(|code| match code {
        serde_json::Value::String(value) => value == "409",
        serde_json::Value::Number(value) => value.as_u64() == Some(409),
        _ => false,
    });
    let text = [payload.error, payload.message]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();

    status_code_conflict || text.contains("duplicate") || text.contains("already exists")
}

fn in_filter(ids: &[RecordId]) -> String {
    let quoted = ids
        .iter()
        .map(|id| format!("\"{}\"", id.as_str().replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({quoted})")
}

fn normalize_object_path(path: &str) -> RemoteResult<String> {
    let path = path.trim().trim_matches('/').to_string();
    if path.is_empty() {
        return Err(RemoteError::InvalidConfiguration(
            "blob path cannot be empty".to_string(),
        ));
    }
    Ok(path)
}

fn encode_object_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> SupabaseRemote {
        let config = RemoteConfig::new("https://project.supabase.co/", "anon")
            .unwrap()
            .with_storage_bucket(Some("cattle".to_string()));
        SupabaseRemote::new(&config, "token").unwrap()
    }

    #[test]
    fn new_rejects_empty_token() {
        let config = RemoteConfig::new("https://project.supabase.co", "anon").unwrap();
        assert!(SupabaseRemote::new(&config, "  ").is_err());
    }

    #[test]
    fn public_url_uses_public_object_route() {
        let url = remote().public_url(&BlobRef::new("user 1/rec.jpg"));
        assert_eq!(
            url,
            "https://project.supabase.co/storage/v1/object/public/cattle/user%201/rec.jpg"
        );
    }

    #[test]
    fn in_filter_quotes_ids() {
        let ids: Vec<RecordId> = vec!["a".parse().unwrap(), "b,c".parse().unwrap()];
        assert_eq!(in_filter(&ids), "in.(\"a\",\"b,c\")");
    }

    #[test]
    fn duplicate_detection_accepts_storage_error_shapes() {
        assert!(is_duplicate_response(StatusCode::CONFLICT, ""));
        assert!(is_duplicate_response(
            StatusCode::BAD_REQUEST,
            r#"{"statusCode":"409","error":"Duplicate","message":"The resource already exists"}"#
        ));
        assert!(!is_duplicate_response(
            StatusCode::BAD_REQUEST,
            r#"{"statusCode":"400","error":"InvalidKey","message":"Invalid key"}"#
        ));
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        let message = parse_api_error(
            StatusCode::UNAUTHORIZED,
            r#"{"message":"JWT expired","code":"PGRST301"}"#,
        );
        assert_eq!(message, "JWT expired (401)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }

    #[test]
    fn debug_redacts_access_token() {
        let rendered = format!("{:?}", remote());
        assert!(!rendered.contains("token\""));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "Requires SUPABASE_URL, SUPABASE_ANON_KEY, BREEDLOG_TEST_ACCESS_TOKEN and BREEDLOG_TEST_USER_ID"]
    async fn supabase_query_roundtrip() {
        let _ = dotenvy::dotenv();
        let config = RemoteConfig::from_env()
            .expect("config should parse")
            .expect("config should be present");
        let token = std::env::var("BREEDLOG_TEST_ACCESS_TOKEN").expect("token must be set");
        let user = UserId::parse(&std::env::var("BREEDLOG_TEST_USER_ID").expect("user must be set"))
            .expect("valid user id");

        let remote = SupabaseRemote::new(&config, token).unwrap();
        remote
            .query_created_after(&user, DateTime::<Utc>::UNIX_EPOCH)
            .await
            .unwrap_or_else(|error| panic!("query failed: {error}"));
    }
}
