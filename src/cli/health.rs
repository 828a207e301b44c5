use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::error::RepurposeError;
use crate::sources::{env_base, join_endpoint};

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthRow {
    pub api: String,
    pub status: String,
    pub latency: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    fn from_rows(rows: Vec<HealthRow>) -> Self {
        let healthy = rows.iter().filter(|r| r.status == "ok").count();
        Self {
            healthy,
            total: rows.len(),
            rows,
        }
    }

    pub fn all_healthy(&self) -> bool {
        self.healthy == self.total
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Repurpose Health Check\n\n");
        out.push_str("| API | Status | Latency |\n");
        out.push_str("|-----|--------|---------|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                row.api, row.status, row.latency
            ));
        }
        out.push_str(&format!(
            "\nStatus: {}/{} checks healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

async fn check_one(client: reqwest::Client, api: &str, url: &str) -> HealthRow {
    let start = Instant::now();
    let resp = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await;

    match resp {
        Ok(resp) => {
            let status = resp.status();
            let elapsed = start.elapsed().as_millis();
            if status.is_success() {
                HealthRow {
                    api: api.to_string(),
                    status: "ok".into(),
                    latency: format!("{elapsed}ms"),
                }
            } else {
                HealthRow {
                    api: api.to_string(),
                    status: "error".into(),
                    latency: format!("{elapsed}ms (HTTP {})", status.as_u16()),
                }
            }
        }
        Err(err) => {
            let reason = if err.is_timeout() {
                "timeout"
            } else if err.is_connect() {
                "connect"
            } else {
                "error"
            };
            HealthRow {
                api: api.to_string(),
                status: "error".into(),
                latency: reason.into(),
            }
        }
    }
}

fn health_http_client() -> Result<reqwest::Client, RepurposeError> {
    static HEALTH_HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

    if let Some(client) = HEALTH_HTTP_CLIENT.get() {
        return Ok(client.clone());
    }

    // Bypasses the cache and retry middleware so every probe reaches the network.
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5))
        .user_agent(concat!("repurpose/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(RepurposeError::HttpClientInit)?;

    match HEALTH_HTTP_CLIENT.set(client.clone()) {
        Ok(()) => Ok(client),
        Err(_) => HEALTH_HTTP_CLIENT
            .get()
            .cloned()
            .ok_or_else(|| RepurposeError::Api {
                api: "health".into(),
                message: "Health HTTP client initialization race".into(),
            }),
    }
}

async fn check_cache_dir() -> HealthRow {
    let start = Instant::now();
    let dir = crate::utils::paths::repurpose_cache_dir();
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let probe = dir.join(format!(".repurpose-healthcheck-{suffix}.tmp"));

    let result = async {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(&probe, b"ok").await?;
        match tokio::fs::remove_file(&probe).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
    .await;

    match result {
        Ok(()) => HealthRow {
            api: format!("Cache dir ({})", dir.display()),
            status: "ok".into(),
            latency: format!("{}ms", start.elapsed().as_millis()),
        },
        Err(err) => HealthRow {
            api: format!("Cache dir ({})", dir.display()),
            status: "error".into(),
            latency: format!("{:?}", err.kind()),
        },
    }
}

/// One cheap probe per upstream, honouring the same base-URL overrides as the clients.
fn probe_urls() -> Vec<(&'static str, String)> {
    let rxnorm = env_base("https://rxnav.nlm.nih.gov/REST", "REPURPOSE_RXNORM_BASE");
    let pubchem = env_base(
        "https://pubchem.ncbi.nlm.nih.gov/rest/pug",
        "REPURPOSE_PUBCHEM_BASE",
    );
    let pubmed = env_base(
        "https://eutils.ncbi.nlm.nih.gov/entrez/eutils",
        "REPURPOSE_PUBMED_BASE",
    );
    let ctgov = env_base("https://clinicaltrials.gov/api/v2", "REPURPOSE_CTGOV_BASE");
    let openfda = env_base("https://api.fda.gov", "REPURPOSE_OPENFDA_BASE");
    vec![
        (
            "RxNorm",
            join_endpoint(&rxnorm, "approximateTerm.json?term=aspirin&maxEntries=1"),
        ),
        (
            "PubChem",
            join_endpoint(&pubchem, "compound/name/aspirin/cids/JSON"),
        ),
        (
            "PubMed",
            join_endpoint(&pubmed, "esearch.fcgi?db=pubmed&term=aspirin&retmax=1&retmode=json"),
        ),
        (
            "ClinicalTrials",
            join_endpoint(&ctgov, "studies?query.intr=aspirin&pageSize=1"),
        ),
        ("OpenFDA", join_endpoint(&openfda, "drug/event.json?limit=1")),
    ]
}

async fn check_urls(
    client: reqwest::Client,
    urls: &[(&'static str, String)],
) -> Vec<HealthRow> {
    let handles: Vec<_> = urls
        .iter()
        .map(|(api, url)| {
            let client = client.clone();
            let api = *api;
            let url = url.clone();
            (api, tokio::spawn(async move { check_one(client, api, &url).await }))
        })
        .collect();

    let mut rows = Vec::with_capacity(handles.len());
    for (api, handle) in handles {
        rows.push(handle.await.unwrap_or_else(|_| HealthRow {
            api: api.to_string(),
            status: "error".into(),
            latency: "probe task failed".into(),
        }));
    }
    rows
}

/// Runs connectivity checks for the five upstream APIs and the local cache directory.
///
/// # Errors
///
/// Returns an error when the health HTTP client cannot be created.
pub async fn check(apis_only: bool) -> Result<HealthReport, RepurposeError> {
    let client = health_http_client()?;
    let urls = probe_urls();

    let (mut rows, cache) = tokio::join!(check_urls(client, &urls), async {
        if apis_only {
            None
        } else {
            Some(check_cache_dir().await)
        }
    });
    rows.extend(cache);
    Ok(HealthReport::from_rows(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn check_urls_reports_http_failures() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let urls = vec![
            ("Up", format!("{}/ok", server.uri())),
            ("Down", format!("{}/down", server.uri())),
        ];
        let client = health_http_client().unwrap();
        let report = HealthReport::from_rows(check_urls(client, &urls).await);

        assert_eq!(report.total, 2);
        assert_eq!(report.healthy, 1);
        assert!(!report.all_healthy());
        assert_eq!(report.rows[0].status, "ok");
        assert!(report.rows[1].latency.contains("HTTP 503"));

        let markdown = report.to_markdown();
        assert!(markdown.contains("| Down | error |"));
        assert!(markdown.contains("Status: 1/2 checks healthy"));
    }

    #[test]
    fn probe_urls_cover_every_upstream() {
        let names: Vec<&str> = probe_urls().iter().map(|(api, _)| *api).collect();
        assert_eq!(
            names,
            vec!["RxNorm", "PubChem", "PubMed", "ClinicalTrials", "OpenFDA"]
        );
    }
}
