//! End-to-end tests: client ⇄ JSONL stream ⇄ server ⇄ mocked Open-Meteo.

use std::{sync::Arc, time::Duration};

use mcp_weather_core::{
    ErrorKind, Location, OpenMeteoProvider, ProviderConfig, RefreshConfig, RefreshScheduler,
    SchedulerEvent, ToolClient, ToolServer, UnitSystem,
    protocol::server::ServerError,
};
use serde_json::{Value, json};
use tokio::{
    io::{BufReader, DuplexStream, ReadHalf, WriteHalf},
    task::JoinHandle,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

type Client = ToolClient<BufReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>>;

fn montevideo() -> Location {
    Location {
        display_name: "Montevideo".to_string(),
        country: "Uruguay".to_string(),
        admin_region: Some("Montevideo".to_string()),
        latitude: -34.90328,
        longitude: -56.18816,
    }
}

fn forecast_body() -> Value {
    let times: Vec<String> = (0..24)
        .map(|h| format!("2025-01-{:02}T{:02}:00", 15 + (12 + h) / 24, (12 + h) % 24))
        .collect();
    json!({
        "current": { "time": "2025-01-15T12:00", "temperature_2m": 20.0, "wind_speed_10m": 15.0 },
        "hourly": {
            "time": times,
            "temperature_2m": vec![20.0; 24],
            "wind_speed_10m": vec![15.0; 24],
            "precipitation": vec![0.5; 24]
        }
    })
}

async fn mock_open_meteo() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("name", "Montevideo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "name": "Montevideo",
                "latitude": -34.90328,
                "longitude": -56.18816,
                "country": "Uruguay",
                "admin1": "Montevideo"
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
        .mount(&server)
        .await;
    server
}

/// Wire a server and a client together over an in-memory duplex.
async fn start(open_meteo: &MockServer) -> (Client, JoinHandle<Result<(), ServerError>>) {
    let provider = Arc::new(
        OpenMeteoProvider::new(ProviderConfig {
            geocoding_url: format!("{}/v1/search", open_meteo.uri()),
            forecast_url: format!("{}/v1/forecast", open_meteo.uri()),
            ..ProviderConfig::default()
        })
        .expect("client builds"),
    );

    let (client_io, server_io) = tokio::io::duplex(256 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let mut server = ToolServer::new(
        BufReader::new(server_read),
        server_write,
        provider.clone(),
        provider,
    );
    let handle = tokio::spawn(async move {
        server.self_check().await?;
        server.announce_ready().await?;
        server.run().await
    });

    let (client_read, client_write) = tokio::io::split(client_io);
    let (client, ready) = ToolClient::connect(
        BufReader::new(client_read),
        client_write,
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
    .await
    .expect("server becomes ready");
    assert_eq!(ready.tools, ["search_city", "get_weather", "list_tools"]);

    (client, handle)
}

#[tokio::test]
async fn search_then_fetch_in_metric() {
    let open_meteo = mock_open_meteo().await;
    let (client, server) = start(&open_meteo).await;

    let tools = client.list_tools().await.expect("list_tools");
    assert_eq!(tools.len(), 3);

    let candidates = client.search_city("Montevideo").await.expect("search");
    let first = candidates.get(0).cloned().expect("one candidate");
    assert_eq!(first, montevideo());

    let snapshot = client
        .get_weather(&first, UnitSystem::Metric)
        .await
        .expect("weather");
    assert_eq!(snapshot.location, montevideo());
    assert_eq!(snapshot.unit_system, UnitSystem::Metric);
    assert_eq!(snapshot.current.temperature, 20.0);
    assert_eq!(snapshot.forecast.points().len(), 24);

    drop(client);
    server.await.unwrap().expect("server ends cleanly on EOF");
}

#[tokio::test]
async fn fetch_in_imperial_converts_every_value() {
    let open_meteo = mock_open_meteo().await;
    let (client, _server) = start(&open_meteo).await;

    let snapshot = client
        .get_weather(&montevideo(), UnitSystem::Imperial)
        .await
        .expect("weather");

    assert_eq!(snapshot.unit_system, UnitSystem::Imperial);
    assert_eq!(snapshot.current.unit_system, UnitSystem::Imperial);
    assert_eq!(snapshot.current.temperature, 68.0);
    assert!((snapshot.current.wind_speed - 9.320565).abs() < 1e-6);
    for point in snapshot.forecast.points() {
        assert_eq!(point.temperature, 68.0);
        assert!((point.precipitation - 0.01968505).abs() < 1e-6);
    }
}

#[tokio::test]
async fn unknown_place_is_an_empty_result() {
    let open_meteo = mock_open_meteo().await;
    let (client, _server) = start(&open_meteo).await;

    let candidates = client.search_city("Xyzzyville").await.expect("search");
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn upstream_outage_reaches_the_client_typed() {
    let open_meteo = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
        .up_to_n_times(2)
        .mount(&open_meteo)
        .await;
    // Health checks hit the mocks above; everything after that fails.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&open_meteo)
        .await;

    let (client, _server) = start(&open_meteo).await;
    let err = client
        .get_weather(&montevideo(), UnitSystem::Metric)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
}

#[tokio::test]
async fn scheduler_refreshes_through_the_tool_client() {
    let open_meteo = mock_open_meteo().await;
    let (client, _server) = start(&open_meteo).await;

    let (mut scheduler, mut events) = RefreshScheduler::new(
        Arc::new(client),
        RefreshConfig {
            interval: Duration::from_secs(3600),
            ..RefreshConfig::default()
        },
    );
    scheduler.select(montevideo(), UnitSystem::Metric).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("first refresh arrives")
        .expect("channel open");
    let SchedulerEvent::SnapshotUpdated(snapshot) = event else {
        panic!("expected a snapshot");
    };
    assert_eq!(snapshot.current.temperature, 20.0);

    scheduler.change_unit(UnitSystem::Imperial).unwrap();
    let Some(SchedulerEvent::SnapshotUpdated(snapshot)) = events.recv().await else {
        panic!("expected a converted snapshot");
    };
    assert_eq!(snapshot.current.temperature, 68.0);
    scheduler.stop();
}

#[tokio::test]
async fn ambiguous_name_yields_distinct_places_with_distinct_weather() {
    let open_meteo = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("name", "San José"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "name": "San José", "latitude": 9.93333, "longitude": -84.08333,
                  "country": "Costa Rica", "admin1": "Provincia de San José" },
                { "name": "San Jose", "latitude": 37.33939, "longitude": -121.89496,
                  "country": "United States", "admin1": "California" }
            ]
        })))
        .mount(&open_meteo)
        .await;

    let mut warm = forecast_body();
    warm["current"]["temperature_2m"] = json!(27.0);
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("latitude", "9.93333"))
        .respond_with(ResponseTemplate::new(200).set_body_json(warm))
        .mount(&open_meteo)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
        .mount(&open_meteo)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&open_meteo)
        .await;

    let (client, _server) = start(&open_meteo).await;
    let candidates = client.search_city("San José").await.expect("search");
    assert!(candidates.len() >= 2);

    let countries: Vec<&str> = candidates.iter().map(|l| l.country.as_str()).collect();
    assert_eq!(countries, ["Costa Rica", "United States"]);

    let mut temperatures = Vec::new();
    for place in &candidates {
        let snapshot = client
            .get_weather(place, UnitSystem::Metric)
            .await
            .expect("weather");
        assert!(snapshot.location.same_place(place));
        assert_eq!(snapshot.location.country, place.country);
        temperatures.push(snapshot.current.temperature);
    }
    assert_eq!(temperatures, [27.0, 20.0]);
}
