use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Certificate, Client};
use scorekeep_model::ValidationResult;
use tracing::{debug, info, warn};
use url::{Origin, Url};

use super::sandbox::{CompiledPolicy, PolicySandbox};
use super::validator::verify_policy;
use crate::error::{CompileError, FetchError, LoaderInitError, PolicyError};

/// Settings for fetching policy source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyLoaderConfig {
    /// PEM bundle added to the client's trust roots.
    pub trusted_ca: Option<PathBuf>,
    /// When set, only policy URIs with this origin are fetched.
    pub trusted_server: Option<String>,
    pub fetch_timeout: Duration,
    pub max_source_bytes: usize,
}

impl Default for PolicyLoaderConfig {
    fn default() -> Self {
        PolicyLoaderConfig {
            trusted_ca: None,
            trusted_server: None,
            fetch_timeout: Duration::from_secs(30),
            max_source_bytes: 256 * 1024,
        }
    }
}

/// Fetches, compiles and verifies policies. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PolicyLoader {
    http: Client,
    sandbox: Arc<PolicySandbox>,
    trusted_origin: Option<Origin>,
    max_source_bytes: usize,
}

impl PolicyLoader {
    pub fn new(
        config: &PolicyLoaderConfig,
        sandbox: Arc<PolicySandbox>,
    ) -> Result<Self, LoaderInitError> {
        let mut builder = Client::builder().timeout(config.fetch_timeout);

        if let Some(path) = &config.trusted_ca {
            for certificate in load_trust_root(path)? {
                builder = builder.add_root_certificate(certificate);
            }
            info!(path = %path.display(), "loaded trusted CA for policy fetches");
        }

        let trusted_origin = config
            .trusted_server
            .as_deref()
            .map(|value| {
                Url::parse(value).map(|url| url.origin()).map_err(|source| {
                    LoaderInitError::TrustedServer {
                        value: value.to_string(),
                        source,
                    }
                })
            })
            .transpose()?;

        let http = builder.build().map_err(LoaderInitError::Client)?;

        Ok(PolicyLoader {
            http,
            sandbox,
            trusted_origin,
            max_source_bytes: config.max_source_bytes,
        })
    }

    pub fn sandbox(&self) -> &Arc<PolicySandbox> {
        &self.sandbox
    }

    pub fn compile(&self, source: &str) -> Result<CompiledPolicy, CompileError> {
        self.sandbox.compile(source)
    }

    /// Downloads policy source text.
    pub async fn fetch(&self, uri: &str) -> Result<String, FetchError> {
        let url = Url::parse(uri).map_err(|source| FetchError::InvalidUri {
            uri: uri.to_string(),
            source,
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedScheme(url.scheme().to_string()));
        }

        if let Some(trusted) = &self.trusted_origin
            && &url.origin() != trusted
        {
            return Err(FetchError::UntrustedOrigin {
                origin: url.origin().ascii_serialization(),
            });
        }

        debug!(%url, "fetching policy");
        let mut response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status(),
            });
        }

        let limit = self.max_source_bytes;
        if response
            .content_length()
            .is_some_and(|length| length > limit as u64)
        {
            return Err(FetchError::TooLarge { limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        String::from_utf8(body).map_err(|_| FetchError::Encoding)
    }

    /// Fetch, compile and probe a policy. Only a policy that passes every
    /// stage is returned.
    pub async fn download_and_verify_policy(
        &self,
        uri: &str,
    ) -> Result<CompiledPolicy, PolicyError> {
        let source = self.fetch(uri).await?;
        let policy = self.compile(&source)?;

        let candidate = policy.clone();
        let verdict =
            tokio::task::spawn_blocking(move || verify_policy(&candidate))
                .await
                .unwrap_or_else(|err| {
                    warn!(error = %err, "policy verification task failed");
                    ValidationResult::single(format!(
                        "policy verification did not complete: {err}"
                    ))
                });

        if !verdict.overall_status {
            return Err(PolicyError::Validation(verdict));
        }

        info!(uri, bytes = source.len(), "policy verified");
        Ok(policy)
    }
}

fn load_trust_root(
    path: &Path,
) -> Result<Vec<Certificate>, LoaderInitError> {
    let file = File::open(path).map_err(|source| LoaderInitError::TrustRootIo {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| LoaderInitError::TrustRootIo {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(LoaderInitError::EmptyTrustRoot {
            path: path.to_path_buf(),
        });
    }

    certs
        .iter()
        .map(|der| {
            Certificate::from_der(der.as_ref())
                .map_err(LoaderInitError::Certificate)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SandboxLimits;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::io::Write;
    use std::net::SocketAddr;

    const GOOD_POLICY: &str = r#"
        #{
            finalScore: rawScore.rawScore,
            adjustedSubmissionDate: rawScore.submissionDate,
            adjustedDaysLate: 0,
            submissionStatus: "on_time",
            extensionStatus: "no_extension"
        }
    "#;

    async fn serve_policies() -> SocketAddr {
        let app = Router::new()
            .route("/good.rhai", get(|| async { GOOD_POLICY }))
            .route("/broken.rhai", get(|| async { "#{ finalScore: " }))
            .route("/incomplete.rhai", get(|| async { "#{ finalScore: 1 }" }))
            .route("/huge.rhai", get(|| async { "x".repeat(4096) }))
            .route("/binary.rhai", get(|| async { vec![0xff_u8, 0xfe, 0xfd] }))
            .route(
                "/missing.rhai",
                get(|| async { (StatusCode::NOT_FOUND, "gone") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn loader(config: PolicyLoaderConfig) -> PolicyLoader {
        let sandbox = Arc::new(PolicySandbox::new(SandboxLimits::default()));
        PolicyLoader::new(&config, sandbox).unwrap()
    }

    #[tokio::test]
    async fn downloads_and_verifies_a_good_policy() {
        let addr = serve_policies().await;
        let loader = loader(PolicyLoaderConfig::default());

        let policy = loader
            .download_and_verify_policy(&format!("http://{addr}/good.rhai"))
            .await;

        assert!(policy.is_ok(), "{policy:?}");
    }

    #[tokio::test]
    async fn each_stage_rejects_with_its_own_error() {
        let addr = serve_policies().await;
        let loader = loader(PolicyLoaderConfig::default());

        let broken = loader
            .download_and_verify_policy(&format!("http://{addr}/broken.rhai"))
            .await;
        assert!(matches!(broken, Err(PolicyError::Compile(_))));

        let incomplete = loader
            .download_and_verify_policy(&format!(
                "http://{addr}/incomplete.rhai"
            ))
            .await;
        match incomplete {
            Err(PolicyError::Validation(verdict)) => {
                assert_eq!(verdict.errors.len(), 4)
            }
            other => panic!("expected validation failure, got {other:?}"),
        }

        let missing = loader
            .download_and_verify_policy(&format!("http://{addr}/missing.rhai"))
            .await;
        assert!(matches!(
            missing,
            Err(PolicyError::Fetch(FetchError::Status { status }))
                if status == reqwest::StatusCode::NOT_FOUND
        ));
    }

    #[tokio::test]
    async fn enforces_size_and_encoding() {
        let addr = serve_policies().await;
        let loader = loader(PolicyLoaderConfig {
            max_source_bytes: 1024,
            ..PolicyLoaderConfig::default()
        });

        let huge = loader.fetch(&format!("http://{addr}/huge.rhai")).await;
        assert!(matches!(huge, Err(FetchError::TooLarge { limit: 1024 })));

        let binary = loader.fetch(&format!("http://{addr}/binary.rhai")).await;
        assert!(matches!(binary, Err(FetchError::Encoding)));
    }

    #[tokio::test]
    async fn rejects_bad_uris_before_any_request() {
        let loader = loader(PolicyLoaderConfig {
            trusted_server: Some("https://policies.example.edu".into()),
            ..PolicyLoaderConfig::default()
        });

        assert!(matches!(
            loader.fetch("not a uri").await,
            Err(FetchError::InvalidUri { .. })
        ));
        assert!(matches!(
            loader.fetch("file:///etc/passwd").await,
            Err(FetchError::UnsupportedScheme(scheme)) if scheme == "file"
        ));
        assert!(matches!(
            loader.fetch("https://evil.example.com/p.rhai").await,
            Err(FetchError::UntrustedOrigin { .. })
        ));
    }

    #[test]
    fn trust_root_must_exist_and_hold_certificates() {
        let missing = PolicyLoader::new(
            &PolicyLoaderConfig {
                trusted_ca: Some(PathBuf::from("/nonexistent/ca.pem")),
                ..PolicyLoaderConfig::default()
            },
            Arc::new(PolicySandbox::new(SandboxLimits::default())),
        );
        assert!(matches!(missing, Err(LoaderInitError::TrustRootIo { .. })));

        let mut empty = tempfile::NamedTempFile::new().unwrap();
        writeln!(empty, "not a certificate").unwrap();
        let empty_bundle = PolicyLoader::new(
            &PolicyLoaderConfig {
                trusted_ca: Some(empty.path().to_path_buf()),
                ..PolicyLoaderConfig::default()
            },
            Arc::new(PolicySandbox::new(SandboxLimits::default())),
        );
        assert!(matches!(
            empty_bundle,
            Err(LoaderInitError::EmptyTrustRoot { .. })
        ));
    }
}
