// This file is dual licensed under the terms of the Apache License, Version
// 2.0, and the BSD License. See the LICENSE file in the root of this repository
// for complete details.

use std::io::{Read, Seek, SeekFrom};

use reqwest::blocking::Client as HTTPClient;
use reqwest::header::RANGE;
use url::Url;
use vfs::VfsPath;

use crate::errors::TransportError;

type Result<T, E = TransportError> = core::result::Result<T, E>;

/// Byte-stream access to artifact and summary URLs. Only the observable
/// behavior matters here: a GET, optionally resumed from an offset via
/// `Range: bytes=N-`, yielding the response body as a reader.
pub trait Transport {
    fn get(&self, url: &Url, offset: Option<u64>) -> Result<Box<dyn Read>>;
}

/// The production transport: HTTP(S) through reqwest, plus `file://` URLs
/// served from a filesystem root when one is configured.
pub struct HttpTransport {
    client: HTTPClient,
    root: Option<VfsPath>,
}

impl HttpTransport {
    pub fn new() -> Result<HttpTransport> {
        let client = HTTPClient::builder().gzip(true).build()?;

        Ok(HttpTransport { client, root: None })
    }

    /// Serve `file://` URLs from the given root as well.
    pub fn with_root(fs: VfsPath) -> Result<HttpTransport> {
        let mut transport = HttpTransport::new()?;
        transport.root = Some(fs);

        Ok(transport)
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url, offset: Option<u64>) -> Result<Box<dyn Read>> {
        match url.scheme() {
            "file" => {
                let root = match &self.root {
                    Some(root) => root,
                    None => {
                        return Err(TransportError::UnsupportedScheme {
                            scheme: url.scheme().to_string(),
                        })
                    }
                };

                let path = root.join(url.path().trim_start_matches('/'))?;
                let mut file = path.open_file()?;
                if let Some(n) = offset {
                    file.seek(SeekFrom::Start(n))?;
                }

                Ok(Box::new(file))
            }
            _ => {
                let mut request = self.client.get(url.clone());
                if let Some(n) = offset {
                    request = request.header(RANGE, format!("bytes={}-", n));
                }
                let response = request.send()?.error_for_status()?;

                Ok(Box::new(response))
            }
        }
    }
}
