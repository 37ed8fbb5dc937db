use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};

use crate::{Coordinates, ErrorKind, Location, SearchQuery, UnitSystem, WeatherError};

pub const SEARCH_CITY: &str = "search_city";
pub const GET_WEATHER: &str = "get_weather";
pub const LIST_TOOLS: &str = "list_tools";

/// Opaque correlation id chosen by the caller.
///
/// Any JSON number or string is accepted and echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Num(Number),
    Str(String),
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Num(n.into())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Num(n) => write!(f, "{n}"),
            RequestId::Str(s) => f.write_str(s),
        }
    }
}

/// One tool invocation as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: RequestId,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&WeatherError> for ErrorEnvelope {
    fn from(err: &WeatherError) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }
}

impl From<ErrorEnvelope> for WeatherError {
    fn from(envelope: ErrorEnvelope) -> Self {
        WeatherError::from_kind(envelope.kind, envelope.message)
    }
}

/// Either `result` or `error` is set. `id` is `None` only for the final
/// line a server writes before dying on a malformed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

impl ToolResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, err: &WeatherError) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorEnvelope::from(err)),
        }
    }

    pub fn into_result(self) -> Result<Value, WeatherError> {
        match (self.result, self.error) {
            (_, Some(envelope)) => Err(envelope.into()),
            (Some(value), None) => Ok(value),
            (None, None) => Err(WeatherError::UpstreamProtocol(
                "response carried neither a result nor an error".to_string(),
            )),
        }
    }
}

/// First line a server writes once it is able to accept requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyLine {
    pub ready: bool,
    pub server: String,
    pub version: String,
    pub tools: Vec<String>,
}

impl ReadyLine {
    pub fn current() -> Self {
        Self {
            ready: true,
            server: "mcp-weather".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            tools: tool_catalog().into_iter().map(|t| t.name).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDescriptor {
    pub name: String,
    pub kind: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub arguments: Vec<ArgumentDescriptor>,
}

fn arg(name: &str, kind: &str, required: bool) -> ArgumentDescriptor {
    ArgumentDescriptor {
        name: name.to_string(),
        kind: kind.to_string(),
        required,
    }
}

/// Everything the server answers to.
pub fn tool_catalog() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: SEARCH_CITY.to_string(),
            description: "Find places by name; returns ranked candidates with country and coordinates."
                .to_string(),
            arguments: vec![arg("query", "string", true)],
        },
        ToolDescriptor {
            name: GET_WEATHER.to_string(),
            description: "Current conditions and a 24-hour hourly forecast for a coordinate pair."
                .to_string(),
            arguments: vec![
                arg("latitude", "number", true),
                arg("longitude", "number", true),
                arg("unit_system", "string", false),
                arg("name", "string", false),
                arg("country", "string", false),
                arg("admin_region", "string", false),
            ],
        },
        ToolDescriptor {
            name: LIST_TOOLS.to_string(),
            description: "Describe the available tools.".to_string(),
            arguments: Vec::new(),
        },
    ]
}

/// A request validated into one strongly-typed variant per tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    SearchCity {
        query: SearchQuery,
    },
    GetWeather {
        location: Location,
        unit_system: UnitSystem,
    },
    ListTools,
}

#[derive(Debug, Deserialize)]
struct SearchCityArgs {
    #[serde(default)]
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetWeatherArgs {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lon")]
    longitude: f64,
    #[serde(default, alias = "unitSystem", alias = "unit")]
    unit_system: Option<String>,
    #[serde(default, alias = "displayName", alias = "display_name")]
    name: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default, alias = "adminRegion")]
    admin_region: Option<String>,
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::SearchCity { .. } => SEARCH_CITY,
            ToolCall::GetWeather { .. } => GET_WEATHER,
            ToolCall::ListTools => LIST_TOOLS,
        }
    }

    pub fn from_request(request: &ToolRequest) -> Result<Self, WeatherError> {
        Self::parse(&request.tool, &request.arguments)
    }

    /// Validate a tool name and its named arguments. Any failure is `InvalidRequest`.
    pub fn parse(tool: &str, arguments: &Value) -> Result<Self, WeatherError> {
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => arguments.clone(),
            other => {
                return Err(WeatherError::InvalidRequest(format!(
                    "arguments for '{tool}' must be an object, got {other}"
                )));
            }
        };

        match tool {
            SEARCH_CITY => {
                let args: SearchCityArgs = decode_args(tool, arguments)?;
                let raw = args.query.ok_or_else(|| {
                    WeatherError::InvalidRequest("the 'query' argument is required".to_string())
                })?;
                Ok(ToolCall::SearchCity {
                    query: SearchQuery::new(&raw)?,
                })
            }
            GET_WEATHER => {
                let args: GetWeatherArgs = decode_args(tool, arguments)?;
                let coordinates = Coordinates::new(args.latitude, args.longitude)?;
                let unit_system = match args.unit_system.as_deref() {
                    None => UnitSystem::Metric,
                    Some(raw) if raw.trim().is_empty() => UnitSystem::Metric,
                    Some(raw) => raw.parse()?,
                };

                let mut location = Location::from_coordinates(coordinates);
                if let Some(name) = args.name.filter(|n| !n.trim().is_empty()) {
                    location.display_name = name.trim().to_string();
                }
                location.country = args.country.unwrap_or_default();
                location.admin_region = args.admin_region.filter(|r| !r.is_empty());

                Ok(ToolCall::GetWeather {
                    location,
                    unit_system,
                })
            }
            LIST_TOOLS => Ok(ToolCall::ListTools),
            other => Err(WeatherError::InvalidRequest(format!(
                "unknown tool '{other}'; available: {SEARCH_CITY}, {GET_WEATHER}, {LIST_TOOLS}"
            ))),
        }
    }

    /// The named-argument mapping that `parse` accepts back.
    pub fn arguments(&self) -> Value {
        match self {
            ToolCall::SearchCity { query } => json!({ "query": query.as_str() }),
            ToolCall::GetWeather {
                location,
                unit_system,
            } => {
                let mut args = json!({
                    "latitude": location.latitude,
                    "longitude": location.longitude,
                    "unit_system": unit_system.as_str(),
                    "name": location.display_name,
                    "country": location.country,
                });
                if let Some(region) = &location.admin_region {
                    args["admin_region"] = json!(region);
                }
                args
            }
            ToolCall::ListTools => json!({}),
        }
    }

    pub fn to_request(&self, id: RequestId) -> ToolRequest {
        ToolRequest {
            id,
            tool: self.name().to_string(),
            arguments: self.arguments(),
        }
    }
}

fn decode_args<T: serde::de::DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, WeatherError> {
    serde_json::from_value(arguments)
        .map_err(|e| WeatherError::InvalidRequest(format!("invalid arguments for '{tool}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::montevideo;

    #[test]
    fn request_frame_parses_with_numeric_or_string_ids() {
        let req: ToolRequest =
            serde_json::from_str(r#"{"id":7,"tool":"search_city","arguments":{"query":"Rivera"}}"#)
                .unwrap();
        assert_eq!(req.id, RequestId::from(7));

        let req: ToolRequest = serde_json::from_str(r#"{"id":"abc","tool":"list_tools"}"#).unwrap();
        assert_eq!(req.id, RequestId::Str("abc".to_string()));
        assert_eq!(req.arguments, Value::Null);
    }

    #[test]
    fn negative_and_fractional_ids_echo_unchanged() {
        for raw in ["-1", "1.5", "18446744073709551615"] {
            let line = format!(r#"{{"id":{raw},"tool":"list_tools"}}"#);
            let req: ToolRequest = serde_json::from_str(&line).unwrap();
            let reply = ToolResponse::success(req.id, json!([]));
            let encoded = serde_json::to_string(&reply).unwrap();
            assert_eq!(encoded, format!(r#"{{"id":{raw},"result":[]}}"#));
        }
    }

    #[test]
    fn frame_without_id_is_rejected() {
        assert!(serde_json::from_str::<ToolRequest>(r#"{"tool":"list_tools"}"#).is_err());
    }

    #[test]
    fn search_city_requires_non_blank_query() {
        let call = ToolCall::parse(SEARCH_CITY, &json!({ "query": "  Montevideo " })).unwrap();
        assert_eq!(
            call,
            ToolCall::SearchCity {
                query: SearchQuery::new("Montevideo").unwrap()
            }
        );

        for args in [json!({}), json!({ "query": "   " }), json!({ "query": 42 })] {
            let err = ToolCall::parse(SEARCH_CITY, &args).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest, "{args}");
        }
    }

    #[test]
    fn get_weather_defaults_to_metric_and_accepts_aliases() {
        let call = ToolCall::parse(GET_WEATHER, &json!({ "lat": 10.0, "lon": 20.0 })).unwrap();
        let ToolCall::GetWeather {
            location,
            unit_system,
        } = call
        else {
            panic!("expected get_weather");
        };
        assert_eq!(unit_system, UnitSystem::Metric);
        assert_eq!(location.display_name, "10.0000, 20.0000");

        let call = ToolCall::parse(
            GET_WEATHER,
            &json!({ "latitude": 10.0, "longitude": 20.0, "unitSystem": "US" }),
        )
        .unwrap();
        assert!(matches!(
            call,
            ToolCall::GetWeather {
                unit_system: UnitSystem::Imperial,
                ..
            }
        ));
    }

    #[test]
    fn get_weather_rejects_bad_arguments() {
        let cases = [
            json!({ "longitude": 1.0 }),
            json!({ "latitude": "north", "longitude": 1.0 }),
            json!({ "latitude": 95.0, "longitude": 1.0 }),
            json!({ "latitude": 1.0, "longitude": -181.0 }),
            json!({ "latitude": 1.0, "longitude": 1.0, "unit_system": "kelvin" }),
        ];
        for args in cases {
            let err = ToolCall::parse(GET_WEATHER, &args).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest, "{args}");
        }
    }

    #[test]
    fn unknown_tool_and_non_object_arguments_are_invalid() {
        let err = ToolCall::parse("forecast", &json!({})).unwrap_err();
        assert!(err.message().contains("unknown tool 'forecast'"));

        let err = ToolCall::parse(LIST_TOOLS, &json!([1, 2])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn get_weather_arguments_rebuild_the_same_call() {
        let call = ToolCall::GetWeather {
            location: montevideo(),
            unit_system: UnitSystem::Imperial,
        };
        let request = call.to_request(RequestId::from(1));
        assert_eq!(request.tool, GET_WEATHER);

        let parsed = ToolCall::from_request(&request).unwrap();
        assert_eq!(parsed, call);
    }

    #[test]
    fn response_envelopes() {
        let ok = ToolResponse::success(RequestId::from(3), json!([1]));
        let wire = serde_json::to_value(&ok).unwrap();
        assert_eq!(wire, json!({ "id": 3, "result": [1] }));

        let err = WeatherError::UpstreamUnavailable("offline".to_string());
        let failed = ToolResponse::failure(Some(RequestId::from(4)), &err);
        let wire = serde_json::to_value(&failed).unwrap();
        assert_eq!(
            wire,
            json!({ "id": 4, "error": { "kind": "UpstreamUnavailable", "message": "offline" } })
        );

        let decoded: ToolResponse = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded.into_result().unwrap_err(), err);
    }

    #[test]
    fn ready_line_lists_every_tool() {
        let ready = ReadyLine::current();
        assert!(ready.ready);
        assert_eq!(ready.tools, [SEARCH_CITY, GET_WEATHER, LIST_TOOLS]);
    }
}
