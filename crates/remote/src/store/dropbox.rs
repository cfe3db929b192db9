//! The Dropbox binding of [`BlobStore`].
//!
//! Built directly on the HTTP content API: `files/download`, `files/upload`
//! with the three write modes, `files/list_folder` (+ `continue`), and
//! `files/delete_v2` with `parent_rev` as the delete precondition. Dropbox's
//! `rev` field is the revision tag the CAS machinery relies on.
//!
//! The client honors `HTTP_PROXY`/`HTTPS_PROXY` through reqwest's default
//! system-proxy support.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{BlobStore, Entry, Error, Revision};

const CONTENT_URL: &str = "https://content.dropboxapi.com/2";
const API_URL: &str = "https://api.dropboxapi.com/2";

const USER_AGENT: &str = concat!("git-remote-dropbox/", env!("CARGO_PKG_VERSION"));

/// Requests against the content endpoint stream file bodies; allow them time.
const TIMEOUT: Duration = Duration::from_secs(300);

//================================================================================================
// Types
//================================================================================================

/// A [`BlobStore`] talking to the Dropbox API with a bearer token.
#[derive(Clone)]
pub struct DropboxStore {
    http: reqwest::Client,
    token: String,
}

#[derive(Serialize)]
struct DownloadArg<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct UploadArg<'a> {
    path: &'a str,
    mode: WriteMode,
    autorename: bool,
    mute: bool,
}

/// The Dropbox write mode, which is what turns a plain upload into a
/// conditional one.
#[derive(Serialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum WriteMode {
    Add,
    Overwrite,
    Update { update: String },
}

#[derive(Serialize)]
struct ListFolderArg<'a> {
    path: &'a str,
    recursive: bool,
}

#[derive(Serialize)]
struct ListFolderContinueArg<'a> {
    cursor: &'a str,
}

#[derive(Serialize)]
struct DeleteArg<'a> {
    path: &'a str,
    parent_rev: &'a str,
}

#[derive(Deserialize)]
struct FileMetadata {
    #[serde(rename = ".tag", default)]
    tag: Option<String>,
    path_display: Option<String>,
    rev: Option<String>,
}

#[derive(Deserialize)]
struct ListFolderResult {
    entries: Vec<FileMetadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Deserialize)]
struct ApiError {
    error_summary: String,
}

//================================================================================================
// Impls
//================================================================================================

impl DropboxStore {
    /// Build a client around a long-lived bearer token.
    pub fn new(token: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(TIMEOUT)
            .build()?;
        Ok(DropboxStore {
            http,
            token: token.into(),
        })
    }

    async fn rpc<A: Serialize>(&self, endpoint: &str, arg: &A) -> Result<Response, Error> {
        let resp = self
            .http
            .post(format!("{API_URL}/{endpoint}"))
            .bearer_auth(&self.token)
            .json(arg)
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(resp)
    }

    async fn content<A: Serialize>(
        &self,
        endpoint: &str,
        arg: &A,
        body: Option<&[u8]>,
    ) -> Result<Response, Error> {
        let mut req = self
            .http
            .post(format!("{CONTENT_URL}/{endpoint}"))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", api_arg(arg)?);
        if let Some(body) = body {
            req = req
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(body.to_vec());
        }
        req.send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))
    }

    async fn upload(&self, path: &str, data: &[u8], mode: WriteMode) -> Result<Revision, Error> {
        let arg = UploadArg {
            path,
            mode,
            autorename: false,
            mute: true,
        };
        let resp = self.content("files/upload", &arg, Some(data)).await?;
        let resp = check(resp, path).await?;
        let meta: FileMetadata = resp
            .json()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        rev_of(meta, path)
    }
}

#[async_trait]
impl BlobStore for DropboxStore {
    async fn get(&self, path: &str) -> Result<(Vec<u8>, Revision), Error> {
        let resp = self
            .content("files/download", &DownloadArg { path }, None)
            .await?;
        let resp = check(resp, path).await?;
        let meta = resp
            .headers()
            .get("dropbox-api-result")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| serde_json::from_str::<FileMetadata>(v).ok())
            .ok_or_else(|| Error::Transient(format!("no api-result metadata for {path}")))?;
        let rev = rev_of(meta, path)?;
        let data = resp
            .bytes()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok((data.to_vec(), rev))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Entry>, Error> {
        let arg = ListFolderArg {
            path: prefix,
            recursive: true,
        };
        let resp = self.rpc("files/list_folder", &arg).await?;
        let resp = check(resp, prefix).await?;
        let mut page: ListFolderResult = resp
            .json()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        let mut entries = Vec::new();
        loop {
            for meta in page.entries.drain(..) {
                if meta.tag.as_deref() != Some("file") {
                    continue;
                }
                if let (Some(path), Some(rev)) = (meta.path_display, meta.rev) {
                    entries.push(Entry {
                        path,
                        rev: Revision::new(rev),
                    });
                }
            }
            if !page.has_more {
                break;
            }
            let arg = ListFolderContinueArg {
                cursor: &page.cursor,
            };
            let resp = self.rpc("files/list_folder/continue", &arg).await?;
            let resp = check(resp, prefix).await?;
            page = resp
                .json()
                .await
                .map_err(|e| Error::Transient(e.to_string()))?;
        }
        Ok(entries)
    }

    async fn put_create(&self, path: &str, data: &[u8]) -> Result<Revision, Error> {
        self.upload(path, data, WriteMode::Add).await.map_err(|e| {
            // The generic conflict from `add` mode means the file exists.
            match e {
                Error::RevMismatch(p) => Error::AlreadyExists(p),
                other => other,
            }
        })
    }

    async fn put_update(
        &self,
        path: &str,
        data: &[u8],
        expected: &Revision,
    ) -> Result<Revision, Error> {
        let mode = WriteMode::Update {
            update: expected.as_str().to_owned(),
        };
        self.upload(path, data, mode).await
    }

    async fn put_overwrite(&self, path: &str, data: &[u8]) -> Result<Revision, Error> {
        self.upload(path, data, WriteMode::Overwrite).await
    }

    async fn delete(&self, path: &str, expected: &Revision) -> Result<(), Error> {
        let arg = DeleteArg {
            path,
            parent_rev: expected.as_str(),
        };
        let resp = self.rpc("files/delete_v2", &arg).await?;
        check(resp, path).await?;
        Ok(())
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Serialize an API argument for the `Dropbox-API-Arg` header.
///
/// HTTP headers must stay within ASCII, so every non-ASCII scalar is emitted
/// as a `\uXXXX` escape.
fn api_arg<A: Serialize>(arg: &A) -> Result<String, Error> {
    let raw = serde_json::to_string(arg).map_err(|e| Error::Transient(e.to_string()))?;
    let mut out = String::with_capacity(raw.len());
    let mut units = [0u16; 2];
    for ch in raw.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    Ok(out)
}

/// Map an HTTP response onto the store error model.
async fn check(resp: Response, path: &str) -> Result<Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(Error::Auth(body));
    }
    if status == StatusCode::CONFLICT {
        let summary = serde_json::from_str::<ApiError>(&body)
            .map(|e| e.error_summary)
            .unwrap_or(body);
        if summary.contains("not_found") {
            return Err(Error::NotFound(path.into()));
        }
        // Both a failed `add` and a failed `update` surface as a path
        // conflict; callers refine this per write mode.
        return Err(Error::RevMismatch(path.into()));
    }
    // 429 and 5xx are worth retrying; anything else ends up here too and the
    // bounded retry surfaces it after the budget runs out.
    Err(Error::Transient(format!("{status}: {body}")))
}

/// Pull the revision tag out of file metadata.
fn rev_of(meta: FileMetadata, path: &str) -> Result<Revision, Error> {
    meta.rev
        .map(Revision::new)
        .ok_or_else(|| Error::Transient(format!("no revision in metadata for {path}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_modes_serialize_as_tagged_unions() {
        let add = serde_json::to_string(&WriteMode::Add).unwrap();
        assert_eq!(add, r#"{".tag":"add"}"#);

        let update = serde_json::to_string(&WriteMode::Update {
            update: "0123456789abcdef".into(),
        })
        .unwrap();
        assert_eq!(update, r#"{".tag":"update","update":"0123456789abcdef"}"#);
    }

    #[test]
    fn api_arg_escapes_non_ascii() {
        let arg = DownloadArg { path: "/päth" };
        let header = api_arg(&arg).unwrap();
        assert_eq!(header, "{\"path\":\"/p\\u00e4th\"}");
        assert!(header.is_ascii());
    }
}
