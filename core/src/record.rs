//! Measurement records and probe payload parsing

use crate::error::{Error, Result};
use crate::network::NetworkSnapshot;
use chrono::{DateTime, Local};
use serde_json::Value;
use std::time::Duration;

/// One completed measurement. Immutable once written; the record log is
/// append-only and insertion order is measurement order. The log mapping
/// goes through [`Self::csv_values`]/[`Self::from_row`].
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    /// Download throughput in bits per second
    pub download: f64,
    /// Upload throughput in bits per second
    pub upload: f64,
    /// Ping latency in milliseconds
    pub ping: f64,
    /// UTC timestamp as reported by the probe
    pub timestamp: String,
    /// The same instant rendered in the local timezone
    pub timestamp_local: String,
    pub bytes_sent: f64,
    pub bytes_received: f64,
    /// Sharing-report URL, when the probe produced one
    pub share: Option<String>,
    pub server_host: String,
    pub server_name: String,
    pub server_country: String,
    pub server_sponsor: String,
    pub server_distance_km: f64,
    pub server_latency_ms: f64,
    pub client_ip: String,
    pub client_isp: String,
    pub client_country: String,
    pub client_lat: String,
    pub client_lon: String,
    /// Active wireless network at the start of the cycle, None if unnamed
    pub network_name: Option<String>,
    /// Active VPN tunnel, None when none was connected
    pub tunnel_name: Option<String>,
    /// Process id of the isolated probe invocation
    pub probe_pid: Option<u32>,
    /// Wall-clock duration of the probe call in seconds
    pub elapsed_secs: f64,
}

/// Canonical column order for the durable log.
pub const COLUMNS: [&str; 23] = [
    "download",
    "upload",
    "ping",
    "timestamp",
    "timestamp_local",
    "bytes_sent",
    "bytes_received",
    "share",
    "server_host",
    "server_name",
    "server_country",
    "server_sponsor",
    "server_distance_km",
    "server_latency_ms",
    "client_ip",
    "client_isp",
    "client_country",
    "client_lat",
    "client_lon",
    "network_name",
    "tunnel_name",
    "probe_pid",
    "elapsed_secs",
];

impl MeasurementRecord {
    /// Build a record from a validated payload plus the cycle context.
    pub fn from_parts(
        payload: ProbePayload,
        snapshot: &NetworkSnapshot,
        probe_pid: Option<u32>,
        elapsed: Duration,
    ) -> Self {
        Self {
            download: payload.download,
            upload: payload.upload,
            ping: payload.ping,
            timestamp: payload.timestamp,
            timestamp_local: payload.timestamp_local,
            bytes_sent: payload.bytes_sent,
            bytes_received: payload.bytes_received,
            share: payload.share,
            server_host: payload.server.host,
            server_name: payload.server.name,
            server_country: payload.server.country,
            server_sponsor: payload.server.sponsor,
            server_distance_km: payload.server.distance_km,
            server_latency_ms: payload.server.latency_ms,
            client_ip: payload.client.ip,
            client_isp: payload.client.isp,
            client_country: payload.client.country,
            client_lat: payload.client.lat,
            client_lon: payload.client.lon,
            network_name: snapshot.network_name.clone(),
            tunnel_name: snapshot.tunnel_name.clone(),
            probe_pid,
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }

    /// Values in `COLUMNS` order. Absent optional fields become empty cells.
    pub fn csv_values(&self) -> Vec<String> {
        vec![
            self.download.to_string(),
            self.upload.to_string(),
            self.ping.to_string(),
            self.timestamp.clone(),
            self.timestamp_local.clone(),
            self.bytes_sent.to_string(),
            self.bytes_received.to_string(),
            self.share.clone().unwrap_or_default(),
            self.server_host.clone(),
            self.server_name.clone(),
            self.server_country.clone(),
            self.server_sponsor.clone(),
            self.server_distance_km.to_string(),
            self.server_latency_ms.to_string(),
            self.client_ip.clone(),
            self.client_isp.clone(),
            self.client_country.clone(),
            self.client_lat.clone(),
            self.client_lon.clone(),
            self.network_name.clone().unwrap_or_default(),
            self.tunnel_name.clone().unwrap_or_default(),
            self.probe_pid.map(|p| p.to_string()).unwrap_or_default(),
            self.elapsed_secs.to_string(),
        ]
    }

    /// Rebuild a record from a log row. Columns missing from `headers`
    /// (rows written before a schema extension) fall back to empty values.
    pub fn from_row(headers: &[String], row: &[String]) -> Self {
        let cell = |name: &str| -> String {
            headers
                .iter()
                .position(|h| h == name)
                .and_then(|i| row.get(i))
                .cloned()
                .unwrap_or_default()
        };
        let num = |name: &str| -> f64 { cell(name).parse().unwrap_or(0.0) };
        let opt = |name: &str| -> Option<String> {
            let v = cell(name);
            if v.is_empty() { None } else { Some(v) }
        };

        Self {
            download: num("download"),
            upload: num("upload"),
            ping: num("ping"),
            timestamp: cell("timestamp"),
            timestamp_local: cell("timestamp_local"),
            bytes_sent: num("bytes_sent"),
            bytes_received: num("bytes_received"),
            share: opt("share"),
            server_host: cell("server_host"),
            server_name: cell("server_name"),
            server_country: cell("server_country"),
            server_sponsor: cell("server_sponsor"),
            server_distance_km: num("server_distance_km"),
            server_latency_ms: num("server_latency_ms"),
            client_ip: cell("client_ip"),
            client_isp: cell("client_isp"),
            client_country: cell("client_country"),
            client_lat: cell("client_lat"),
            client_lon: cell("client_lon"),
            network_name: opt("network_name"),
            tunnel_name: opt("tunnel_name"),
            probe_pid: cell("probe_pid").parse().ok(),
            elapsed_secs: num("elapsed_secs"),
        }
    }
}

/// Validated probe output, before cycle context is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbePayload {
    pub download: f64,
    pub upload: f64,
    pub ping: f64,
    pub timestamp: String,
    pub timestamp_local: String,
    pub bytes_sent: f64,
    pub bytes_received: f64,
    pub share: Option<String>,
    pub server: ServerMeta,
    pub client: ClientMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerMeta {
    pub host: String,
    pub name: String,
    pub country: String,
    pub sponsor: String,
    pub distance_km: f64,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientMeta {
    pub ip: String,
    pub isp: String,
    pub country: String,
    pub lat: String,
    pub lon: String,
}

/// Parse and validate a raw probe payload.
///
/// Every required field must be present and of the right shape; failures
/// name the offending field. The only normalization performed is rendering
/// the UTC timestamp in the local timezone alongside the original.
pub fn parse_payload(raw: &str) -> Result<ProbePayload> {
    let root: Value = serde_json::from_str(raw)
        .map_err(|e| Error::MalformedResult(format!("payload is not valid JSON: {e}")))?;

    let timestamp = req_string(&root, "timestamp")?;
    let parsed: DateTime<chrono::FixedOffset> = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| Error::MalformedResult(format!("field timestamp is not a timestamp: {e}")))?;
    let timestamp_local = parsed.with_timezone(&Local).to_rfc3339();

    let server = req_object(&root, "server")?;
    let client = req_object(&root, "client")?;

    Ok(ProbePayload {
        download: req_number(&root, "download")?,
        upload: req_number(&root, "upload")?,
        ping: req_number(&root, "ping")?,
        timestamp,
        timestamp_local,
        bytes_sent: req_number(&root, "bytes_sent")?,
        bytes_received: req_number(&root, "bytes_received")?,
        share: nullable_string(&root, "share")?,
        server: ServerMeta {
            host: req_string(server, "host")?,
            name: req_string(server, "name")?,
            country: req_string(server, "country")?,
            sponsor: req_string(server, "sponsor")?,
            distance_km: req_number(server, "d")?,
            latency_ms: req_number(server, "latency")?,
        },
        client: ClientMeta {
            ip: req_string(client, "ip")?,
            isp: req_string(client, "isp")?,
            country: req_string(client, "country")?,
            lat: req_coordinate(client, "lat")?,
            lon: req_coordinate(client, "lon")?,
        },
    })
}

fn req_field<'a>(value: &'a Value, key: &str) -> Result<&'a Value> {
    value
        .get(key)
        .ok_or_else(|| Error::MalformedResult(format!("missing field: {key}")))
}

fn req_number(value: &Value, key: &str) -> Result<f64> {
    req_field(value, key)?
        .as_f64()
        .ok_or_else(|| Error::MalformedResult(format!("field {key} is not a number")))
}

fn req_string(value: &Value, key: &str) -> Result<String> {
    req_field(value, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedResult(format!("field {key} is not a string")))
}

fn req_object<'a>(value: &'a Value, key: &str) -> Result<&'a Value> {
    let field = req_field(value, key)?;
    if field.is_object() {
        Ok(field)
    } else {
        Err(Error::MalformedResult(format!(
            "field {key} is not an object"
        )))
    }
}

/// The key must exist but its value may be null.
fn nullable_string(value: &Value, key: &str) -> Result<Option<String>> {
    match req_field(value, key)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(Error::MalformedResult(format!(
            "field {key} is not a string or null"
        ))),
    }
}

/// Coordinates arrive as strings from some probes and numbers from others.
fn req_coordinate(value: &Value, key: &str) -> Result<String> {
    match req_field(value, key)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(Error::MalformedResult(format!(
            "field {key} is not a coordinate"
        ))),
    }
}

/// Representative probe payload shared by tests across the crate.
#[cfg(test)]
pub(crate) const SAMPLE_PAYLOAD: &str = r#"{
        "download": 93181923.0,
        "upload": 24612881.5,
        "ping": 18.25,
        "timestamp": "2026-08-28T10:15:30.123456Z",
        "bytes_sent": 30801920.0,
        "bytes_received": 117043416.0,
        "share": "http://www.speedtest.net/result/12345.png",
        "server": {
            "url": "http://example.net:8080/speedtest/upload.php",
            "host": "example.net:8080",
            "name": "Tokyo",
            "country": "Japan",
            "sponsor": "Example ISP",
            "id": "48463",
            "d": 12.3,
            "latency": 17.5,
            "lat": "35.6895",
            "lon": "139.6917"
        },
        "client": {
            "ip": "203.0.113.10",
            "isp": "Example ISP",
            "country": "JP",
            "lat": "35.68",
            "lon": "139.69",
            "isprating": "3.7"
        }
    }"#;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn parses_full_payload() {
        let payload = parse_payload(SAMPLE_PAYLOAD).unwrap();
        assert_eq!(payload.download, 93181923.0);
        assert_eq!(payload.upload, 24612881.5);
        assert_eq!(payload.ping, 18.25);
        assert_eq!(payload.bytes_sent, 30801920.0);
        assert_eq!(
            payload.share.as_deref(),
            Some("http://www.speedtest.net/result/12345.png")
        );
        assert_eq!(payload.server.host, "example.net:8080");
        assert_eq!(payload.server.distance_km, 12.3);
        assert_eq!(payload.server.latency_ms, 17.5);
        assert_eq!(payload.client.ip, "203.0.113.10");
        assert_eq!(payload.client.lat, "35.68");
    }

    #[test]
    fn localized_timestamp_names_the_same_instant() {
        let payload = parse_payload(SAMPLE_PAYLOAD).unwrap();
        let original = DateTime::parse_from_rfc3339(&payload.timestamp)
            .unwrap()
            .with_timezone(&Utc);
        let localized = DateTime::parse_from_rfc3339(&payload.timestamp_local)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(original, localized);
    }

    #[test]
    fn null_share_is_accepted() {
        let raw = SAMPLE_PAYLOAD.replace(
            r#""http://www.speedtest.net/result/12345.png""#,
            "null",
        );
        let payload = parse_payload(&raw).unwrap();
        assert_eq!(payload.share, None);
    }

    #[test]
    fn missing_base_field_is_rejected() {
        let root: Value = serde_json::from_str(SAMPLE_PAYLOAD).unwrap();
        for field in ["download", "upload", "ping", "timestamp", "bytes_sent", "bytes_received", "share", "server", "client"] {
            let mut trimmed = root.clone();
            trimmed.as_object_mut().unwrap().remove(field);
            let err = parse_payload(&trimmed.to_string()).unwrap_err();
            assert!(
                err.to_string().contains(field),
                "error for missing {field} was: {err}"
            );
        }
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let mut root: Value = serde_json::from_str(SAMPLE_PAYLOAD).unwrap();
        root["download"] = Value::String("fast".into());
        let err = parse_payload(&root.to_string()).unwrap_err();
        assert!(matches!(err, Error::MalformedResult(_)));
        assert!(err.to_string().contains("download"));

        let mut root: Value = serde_json::from_str(SAMPLE_PAYLOAD).unwrap();
        root["server"] = Value::String("example.net".into());
        let err = parse_payload(&root.to_string()).unwrap_err();
        assert!(err.to_string().contains("server"));
    }

    #[test]
    fn missing_nested_field_is_rejected() {
        let mut root: Value = serde_json::from_str(SAMPLE_PAYLOAD).unwrap();
        root["server"].as_object_mut().unwrap().remove("latency");
        let err = parse_payload(&root.to_string()).unwrap_err();
        assert!(err.to_string().contains("latency"));
    }

    #[test]
    fn numeric_coordinates_are_accepted() {
        let mut root: Value = serde_json::from_str(SAMPLE_PAYLOAD).unwrap();
        root["client"]["lat"] = serde_json::json!(35.68);
        let payload = parse_payload(&root.to_string()).unwrap();
        assert_eq!(payload.client.lat, "35.68");
    }

    #[test]
    fn garbage_payload_is_rejected() {
        let err = parse_payload("not json at all").unwrap_err();
        assert!(matches!(err, Error::MalformedResult(_)));
    }

    #[test]
    fn row_round_trip_preserves_fields() {
        let payload = parse_payload(SAMPLE_PAYLOAD).unwrap();
        let snapshot = NetworkSnapshot {
            network_name: Some("Home-5G".to_string()),
            tunnel_name: None,
        };
        let record = MeasurementRecord::from_parts(
            payload,
            &snapshot,
            Some(4242),
            Duration::from_secs_f64(31.5),
        );
        let headers: Vec<String> = COLUMNS.iter().map(|c| c.to_string()).collect();
        let row = record.csv_values();
        let rebuilt = MeasurementRecord::from_row(&headers, &row);
        assert_eq!(record, rebuilt);
    }
}
