use std::sync::Arc;
use std::time::Duration;

use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::{cycle, json_encoded, status_code};
use httptest::{Expectation, Server};
use serde_json::json;

use merchant_mapper::{
    AppError, BatchResolver, Coordinates, GeocodeFailure, Geocoder, NominatimGeocoder,
    RawRecord, ResolverConfig, StrategyName,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn backend(server: &Server) -> NominatimGeocoder {
    NominatimGeocoder::new(server.url_str("/"), "merchant_mapper_tests").unwrap()
}

#[tokio::test]
async fn parses_first_search_hit() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path("/search"),
            request::query(url_decoded(contains(("q", "jalan braga 5, bandung")))),
            request::query(url_decoded(contains(("format", "json")))),
            request::query(url_decoded(contains(("limit", "1"))))
        ])
        .respond_with(json_encoded(json!([
            {"lat": "-6.2", "lon": "106.8", "display_name": "Bandung"},
            {"lat": "0", "lon": "0"}
        ]))),
    );

    let coordinates = backend(&server)
        .geocode("jalan braga 5, bandung", TIMEOUT)
        .await
        .unwrap();
    assert_eq!(coordinates, Coordinates::new(-6.2, 106.8));
}

#[tokio::test]
async fn empty_result_is_not_found() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::path("/search")).respond_with(json_encoded(json!([]))),
    );

    let failure = backend(&server).geocode("nowhere", TIMEOUT).await.unwrap_err();
    assert_eq!(failure, GeocodeFailure::NotFound);
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let server = Server::run();
    server.expect(Expectation::matching(request::path("/search")).respond_with(status_code(503)));

    let failure = backend(&server).geocode("bandung", TIMEOUT).await.unwrap_err();
    assert!(matches!(failure, GeocodeFailure::ServiceUnavailable(_)));
    assert!(failure.is_retryable());
}

#[tokio::test]
async fn client_errors_are_malformed() {
    let server = Server::run();
    server.expect(Expectation::matching(request::path("/search")).respond_with(status_code(400)));

    let failure = backend(&server).geocode("bandung", TIMEOUT).await.unwrap_err();
    assert!(matches!(failure, GeocodeFailure::Malformed(_)));
    assert!(!failure.is_retryable());
}

#[tokio::test]
async fn health_check_hits_status_endpoint() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path("/status"),
            request::query(url_decoded(contains(("format", "json"))))
        ])
        .respond_with(json_encoded(json!({"status": 0, "message": "OK"}))),
    );

    assert!(backend(&server).health_check(TIMEOUT).await.is_ok());
}

#[tokio::test]
async fn batch_over_http_backend() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::path("/status"))
            .respond_with(json_encoded(json!({"status": 0}))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::path("/search"),
            request::query(url_decoded(contains(("q", "jalan malioboro 1, yogyakarta"))))
        ])
        .respond_with(json_encoded(json!([]))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::path("/search"),
            request::query(url_decoded(contains(("q", "yogyakarta"))))
        ])
        .respond_with(json_encoded(json!([{"lat": -7.7956, "lon": 110.3695}]))),
    );

    let resolver =
        BatchResolver::new(Arc::new(backend(&server)), ResolverConfig::default()).unwrap();
    let record = RawRecord {
        city: Some("Yogyakarta".into()),
        ..RawRecord::new(0, "Jl. Malioboro 1")
    };

    let report = resolver.resolve_records(vec![record], None, None).await.unwrap();
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.strategy_used, Some(StrategyName::CityOnly));
    assert_eq!(outcome.coordinates, Some(Coordinates::new(-7.7956, 110.3695)));
    assert_eq!(report.stats.geocoder_calls, 2);
}

#[tokio::test]
async fn transient_status_failure_is_retried() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::path("/status"))
            .times(2)
            .respond_with(cycle![
                status_code(503),
                json_encoded(json!({"status": 0}))
            ]),
    );
    server.expect(
        Expectation::matching(request::path("/search"))
            .respond_with(json_encoded(json!([{"lat": "-8.65", "lon": "115.22"}]))),
    );

    let config = ResolverConfig {
        retry_delay: Duration::from_millis(10),
        ..ResolverConfig::default()
    };
    let resolver = BatchResolver::new(Arc::new(backend(&server)), config).unwrap();
    let report = resolver
        .resolve_records(vec![RawRecord::new(0, "Jl. Gajah Mada 3")], None, None)
        .await
        .unwrap();
    assert_eq!(report.stats.resolved, 1);
}

#[tokio::test]
async fn unhealthy_service_aborts_the_batch() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::path("/status"))
            .times(3)
            .respond_with(status_code(503)),
    );

    let config = ResolverConfig {
        retry_delay: Duration::from_millis(10),
        ..ResolverConfig::default()
    };
    let resolver = BatchResolver::new(Arc::new(backend(&server)), config).unwrap();
    let result = resolver
        .resolve_records(vec![RawRecord::new(0, "anywhere")], None, None)
        .await;
    assert!(matches!(result, Err(AppError::BackendUnavailable(_))));
}
