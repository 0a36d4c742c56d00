//! Integration tests for nuget-lens against a mock NuGet v3 server

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nuget_lens::config::Config;
use nuget_lens::registries::nuget::NuGetEndpoints;
use nuget_lens::registries::{RegistryError, VulnerabilitySeverity};
use nuget_lens::reports::generate_json_report;
use nuget_lens::resolver::ResolutionEngine;
use nuget_lens::update::UpdateKind;

/// Mock NuGet server laid out like `NuGetEndpoints::from_base_url`
struct MockNuGet {
    server: MockServer,
}

impl MockNuGet {
    async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    fn url(&self) -> String {
        self.server.uri()
    }

    fn config(&self) -> Config {
        let endpoints = NuGetEndpoints::from_base_url(&self.url());
        let mut config = Config::default();
        config.registry.service_index_url = endpoints.service_index;
        config.registry.flat_container_url = endpoints.flat_container;
        config.registry.registration_url = endpoints.registration;
        config.registry.search_url = endpoints.search;
        config.registry.timeout_secs = 5;
        config
    }

    fn engine(&self) -> ResolutionEngine {
        ResolutionEngine::from_config(&self.config()).expect("engine")
    }

    async fn register_versions(&self, id: &str, versions: &[&str]) {
        Mock::given(method("GET"))
            .and(path(format!("/v3-flatcontainer/{}/index.json", id.to_lowercase())))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "versions": versions })))
            .mount(&self.server)
            .await;
    }

    async fn register_registration(&self, id: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(format!(
                "/v3/registration5-gz-semver2/{}/index.json",
                id.to_lowercase()
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    async fn register_search(&self, query: &str, data: Value) {
        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("q", query))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
            .mount(&self.server)
            .await;
    }

    /// Service index advertising the vulnerability feed, plus its pages
    async fn register_vulnerability_feed(&self, pages: &[(&str, Value)]) {
        let base = self.url();
        Mock::given(method("GET"))
            .and(path("/v3/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "version": "3.0.0",
                "resources": [
                    {
                        "@id": format!("{base}/v3-flatcontainer/"),
                        "@type": "PackageBaseAddress/3.0.0"
                    },
                    {
                        "@id": format!("{base}/v3/vulnerabilities/index.json"),
                        "@type": "VulnerabilityInfo/6.7.0"
                    }
                ]
            })))
            .mount(&self.server)
            .await;

        let index: Vec<Value> = pages
            .iter()
            .map(|(name, _)| {
                json!({
                    "@name": name,
                    "@id": format!("{base}/v3/vulnerabilities/{name}.json"),
                    "@updated": "2024-10-01T00:00:00Z"
                })
            })
            .collect();
        Mock::given(method("GET"))
            .and(path("/v3/vulnerabilities/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(index))
            .mount(&self.server)
            .await;

        for (name, content) in pages {
            Mock::given(method("GET"))
                .and(path(format!("/v3/vulnerabilities/{name}.json")))
                .respond_with(ResponseTemplate::new(200).set_body_json(content))
                .mount(&self.server)
                .await;
        }
    }
}

fn catalog_entry(id: &str, version: &str) -> Value {
    json!({
        "@id": format!("https://api.nuget.org/v3/catalog0/data/{}.{version}.json", id.to_lowercase()),
        "id": id,
        "version": version,
        "description": "Json.NET is a popular high-performance JSON framework for .NET",
        "authors": "James Newton-King",
        "licenseExpression": "MIT",
        "projectUrl": "https://www.newtonsoft.com/json",
        "tags": ["json"],
        "published": "2023-03-08T07:42:54.647+00:00"
    })
}

fn batch(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(p, v)| (p.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_versions_are_sorted_descending() {
    let nuget = MockNuGet::start().await;
    nuget
        .register_versions(
            "Newtonsoft.Json",
            &["1.0.0", "1.1.0", "1.0.0-beta", "2.0.0-alpha", "1.1.1"],
        )
        .await;
    let engine = nuget.engine();

    assert_eq!(
        engine.versions("Newtonsoft.Json").await,
        vec!["2.0.0-alpha", "1.1.1", "1.1.0", "1.0.0", "1.0.0-beta"]
    );
    assert_eq!(
        engine.latest_version("Newtonsoft.Json").await.as_deref(),
        Some("1.1.1")
    );
    assert_eq!(
        engine.latest_prerelease("newtonsoft.json").await.as_deref(),
        Some("2.0.0-alpha")
    );
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let nuget = MockNuGet::start().await;
    Mock::given(method("GET"))
        .and(path("/v3-flatcontainer/serilog/index.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "versions": ["3.0.0", "3.1.1"] }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&nuget.server)
        .await;
    let engine = Arc::new(nuget.engine());

    let lookups = (0..10).map(|i| {
        let engine = Arc::clone(&engine);
        let name = if i % 2 == 0 { "Serilog" } else { "serilog" };
        tokio::spawn(async move { engine.versions(name).await })
    });
    for result in futures::future::join_all(lookups).await {
        assert_eq!(result.unwrap(), vec!["3.1.1", "3.0.0"]);
    }

    // Served from cache afterwards
    assert_eq!(engine.versions("SERILOG").await, vec!["3.1.1", "3.0.0"]);
}

#[tokio::test]
async fn test_failed_fetch_is_not_cached() {
    let nuget = MockNuGet::start().await;
    Mock::given(method("GET"))
        .and(path("/v3-flatcontainer/polly/index.json"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&nuget.server)
        .await;
    nuget.register_versions("Polly", &["8.4.1"]).await;
    let engine = nuget.engine();

    let err = engine.try_versions("Polly").await.unwrap_err();
    assert!(matches!(err, RegistryError::Status { status: 503, .. }));

    assert_eq!(engine.versions("Polly").await, vec!["8.4.1"]);
}

#[tokio::test]
async fn test_unknown_package_is_not_found() {
    let nuget = MockNuGet::start().await;
    let engine = nuget.engine();

    let err = engine.try_versions("Does.Not.Exist").await.unwrap_err();
    assert_eq!(err, RegistryError::NotFound("Does.Not.Exist".to_string()));
    assert!(engine.versions("Does.Not.Exist").await.is_empty());
}

#[tokio::test]
async fn test_metadata_from_inlined_registration_enriched_by_search() {
    let nuget = MockNuGet::start().await;
    nuget
        .register_registration(
            "Newtonsoft.Json",
            json!({
                "count": 1,
                "items": [{
                    "@id": format!("{}/v3/registration5-gz-semver2/newtonsoft.json/index.json#page/12.0.1/13.0.3", nuget.url()),
                    "lower": "12.0.1",
                    "upper": "13.0.3",
                    "items": [
                        { "catalogEntry": catalog_entry("Newtonsoft.Json", "13.0.1") },
                        { "catalogEntry": catalog_entry("Newtonsoft.Json", "13.0.3") }
                    ]
                }]
            }),
        )
        .await;
    nuget
        .register_search(
            "Newtonsoft.Json",
            json!([{
                "id": "Newtonsoft.Json",
                "version": "13.0.3",
                "description": "Search description",
                "authors": ["James Newton-King"],
                "totalDownloads": 5_000_000_000u64,
                "verified": true,
                "iconUrl": "https://api.nuget.org/v3-flatcontainer/newtonsoft.json/13.0.3/icon",
                "versions": [{ "version": "13.0.3", "downloads": 1000 }]
            }]),
        )
        .await;
    let engine = nuget.engine();

    let metadata = engine
        .metadata("Newtonsoft.Json", Some("13.0.1"))
        .await
        .expect("metadata");

    assert_eq!(metadata.version, "13.0.1");
    assert_eq!(metadata.license.as_deref(), Some("MIT"));
    // Primary wins
    assert_eq!(
        metadata.description.as_deref(),
        Some("Json.NET is a popular high-performance JSON framework for .NET")
    );
    // Back-filled from search
    assert_eq!(metadata.total_downloads, Some(5_000_000_000));
    assert_eq!(metadata.verified, Some(true));
    assert!(metadata.icon_url.is_some());
    assert!(metadata.published.is_some());
}

#[tokio::test]
async fn test_metadata_follows_paged_registration() {
    let nuget = MockNuGet::start().await;
    let page_url = format!(
        "{}/v3/registration5-gz-semver2/serilog/page/3.0.0/3.1.1.json",
        nuget.url()
    );
    nuget
        .register_registration(
            "Serilog",
            json!({
                "count": 2,
                "items": [
                    {
                        "@id": format!("{}/v3/registration5-gz-semver2/serilog/page/1.0.0/2.12.0.json", nuget.url()),
                        "lower": "1.0.0",
                        "upper": "2.12.0"
                    },
                    {
                        "@id": page_url,
                        "lower": "3.0.0",
                        "upper": "3.1.1"
                    }
                ]
            }),
        )
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/registration5-gz-semver2/serilog/page/3.0.0/3.1.1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "@id": page_url,
            "lower": "3.0.0",
            "upper": "3.1.1",
            "items": [{
                "catalogEntry": {
                    "id": "Serilog",
                    "version": "3.1.1",
                    "description": "Simple .NET logging with fully-structured events",
                    "authors": "Serilog Contributors",
                    "licenseExpression": "Apache-2.0"
                }
            }]
        })))
        .expect(1)
        .mount(&nuget.server)
        .await;
    let engine = nuget.engine();

    let metadata = engine.metadata("Serilog", Some("3.1.1")).await.expect("metadata");
    assert_eq!(metadata.id, "Serilog");
    assert_eq!(metadata.authors, vec!["Serilog Contributors"]);
    assert_eq!(metadata.license.as_deref(), Some("Apache-2.0"));
}

#[tokio::test]
async fn test_metadata_for_semver2_version_comes_from_registration() {
    let nuget = MockNuGet::start().await;
    let mut entry = catalog_entry("Aspire.Hosting", "9.0.0-rc.1.24431.7");
    entry["deprecation"] = json!({
        "reasons": ["Legacy"],
        "message": "Superseded by the 9.0.0 release",
        "alternatePackage": { "id": "Aspire.Hosting", "range": "[9.0.0, )" }
    });
    nuget
        .register_registration(
            "Aspire.Hosting",
            json!({
                "count": 1,
                "items": [{
                    "@id": format!("{}/v3/registration5-gz-semver2/aspire.hosting/index.json#page/8.2.0/9.0.0-rc.1.24431.7", nuget.url()),
                    "lower": "8.2.0",
                    "upper": "9.0.0-rc.1.24431.7",
                    "items": [
                        { "catalogEntry": catalog_entry("Aspire.Hosting", "8.2.0") },
                        { "catalogEntry": entry }
                    ]
                }]
            }),
        )
        .await;
    let engine = nuget.engine();

    let metadata = engine
        .metadata("Aspire.Hosting", Some("9.0.0-rc.1.24431.7"))
        .await
        .expect("metadata");

    assert_eq!(metadata.version, "9.0.0-rc.1.24431.7");
    assert!(metadata.published.is_some());
    let deprecation = metadata.deprecation.expect("deprecation");
    assert_eq!(deprecation.reasons, vec!["Legacy"]);
    assert_eq!(deprecation.alternate_package.as_deref(), Some("Aspire.Hosting"));
}

#[tokio::test]
async fn test_metadata_falls_back_to_search() {
    let nuget = MockNuGet::start().await;
    nuget.register_versions("Dapper", &["2.1.28", "2.1.35"]).await;
    nuget
        .register_search(
            "dapper",
            json!([
                { "id": "Dapper.Contrib", "version": "2.0.78" },
                {
                    "id": "Dapper",
                    "version": "2.1.35",
                    "description": "A high performance Micro-ORM",
                    "authors": "Sam Saffron, Marc Gravell, Nick Craver",
                    "totalDownloads": 300000000,
                    "versions": [
                        { "version": "2.1.28", "downloads": 10 },
                        { "version": "2.1.35", "downloads": 20 }
                    ]
                }
            ]),
        )
        .await;
    let engine = nuget.engine();

    // No registration mock: the registration lookup 404s
    let metadata = engine.metadata("dapper", None).await.expect("metadata");
    assert_eq!(metadata.id, "Dapper");
    assert_eq!(metadata.version, "2.1.35");
    assert_eq!(
        metadata.authors,
        vec!["Sam Saffron", "Marc Gravell", "Nick Craver"]
    );
    assert_eq!(metadata.total_downloads, Some(300_000_000));
}

#[tokio::test]
async fn test_search_passthrough() {
    let nuget = MockNuGet::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("q", "json"))
        .and(query_param("take", "5"))
        .and(query_param("prerelease", "true"))
        .and(query_param("semVerLevel", "2.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalHits": 1,
            "data": [{ "id": "Newtonsoft.Json", "version": "13.0.3" }]
        })))
        .mount(&nuget.server)
        .await;
    let engine = nuget.engine();

    let results = engine.search("json", 5, true).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "Newtonsoft.Json");

    // Unmatched query: server answers 404, search degrades to empty
    assert!(engine.search("json", 5, false).await.is_empty());
}

#[tokio::test]
async fn test_vulnerabilities_from_feed() {
    let nuget = MockNuGet::start().await;
    nuget
        .register_vulnerability_feed(&[
            (
                "base",
                json!({
                    "newtonsoft.json": [{
                        "url": "https://github.com/advisories/GHSA-5crp-9r3c-p9vr",
                        "severity": 2,
                        "versions": "(, 13.0.1)"
                    }]
                }),
            ),
            (
                "update",
                json!({
                    "System.Text.Json": [{
                        "url": "https://github.com/advisories/GHSA-hh2w-p6rv-4g7w",
                        "severity": 3,
                        "versions": "[8.0.0, 8.0.5)"
                    }]
                }),
            ),
        ])
        .await;
    let engine = nuget.engine();

    let vulns = engine.vulnerabilities("Newtonsoft.Json", "12.0.3").await;
    assert_eq!(vulns.len(), 1);
    assert_eq!(vulns[0].severity, VulnerabilitySeverity::High);

    assert!(engine.vulnerabilities("Newtonsoft.Json", "13.0.1").await.is_empty());

    let vulns = engine.vulnerabilities("system.text.json", "8.0.4").await;
    assert_eq!(vulns[0].severity, VulnerabilitySeverity::Critical);
}

#[tokio::test]
async fn test_resolve_batch_end_to_end() {
    let nuget = MockNuGet::start().await;
    nuget
        .register_versions("Newtonsoft.Json", &["12.0.3", "13.0.1", "13.0.3"])
        .await;
    nuget
        .register_versions("Serilog", &["3.0.0", "3.1.1", "4.0.0-dev-02108"])
        .await;
    nuget
        .register_vulnerability_feed(&[(
            "base",
            json!({
                "newtonsoft.json": [{
                    "url": "https://github.com/advisories/GHSA-5crp-9r3c-p9vr",
                    "severity": 2,
                    "versions": "(, 13.0.1)"
                }]
            }),
        )])
        .await;
    let engine = nuget.engine();

    let results = engine
        .resolve_batch(&batch(&[
            ("Newtonsoft.Json", "12.0.3"),
            ("Serilog", "[3.1.1]"),
            ("Missing.Package", "1.0.0"),
        ]))
        .await;

    let json = &results[0];
    assert_eq!(json.latest_stable.as_deref(), Some("13.0.3"));
    assert_eq!(json.latest_prerelease, None);
    assert!(json.update_available);
    assert_eq!(json.update_kind, UpdateKind::Major);
    assert_eq!(json.vulnerabilities.len(), 1);

    let serilog = &results[1];
    assert_eq!(serilog.current_version, "3.1.1");
    assert_eq!(serilog.latest_prerelease.as_deref(), Some("4.0.0-dev-02108"));
    assert!(!serilog.update_available);
    assert!(serilog.vulnerabilities.is_empty());

    let missing = &results[2];
    assert!(missing.lookup_failed);
    assert_eq!(missing.latest_stable, None);

    let report: Value = serde_json::from_str(&generate_json_report(&results).unwrap()).unwrap();
    assert_eq!(report["summary"]["packages"], 3);
    assert_eq!(report["summary"]["vulnerabilities"], 1);
}

#[tokio::test]
async fn test_invalidate_package_refetches() {
    let nuget = MockNuGet::start().await;
    Mock::given(method("GET"))
        .and(path("/v3-flatcontainer/moq/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "versions": ["4.20.70"] })))
        .expect(2)
        .mount(&nuget.server)
        .await;
    let engine = nuget.engine();

    engine.versions("Moq").await;
    engine.versions("Moq").await;
    engine.invalidate_package("Moq");
    engine.versions("moq").await;
}
