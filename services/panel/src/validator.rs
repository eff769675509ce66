//! Structural validation of a candidate engine configuration.
//!
//! [`validate`] is pure: no I/O, no panics on odd input.  Every inbound,
//! outbound and routing rule is checked and every finding is reported with
//! a field path (`inbounds[2].settings.clients[0].id`), so callers can point
//! at the offending entry.  Errors make the result invalid; warnings do not.

use crate::config_builder::ProxyConfig;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

/// Frozen finding codes.
pub mod codes {
    pub const MALFORMED_CONFIG: &str = "MALFORMED_CONFIG";
    pub const NO_INBOUNDS: &str = "NO_INBOUNDS";
    pub const NO_OUTBOUNDS: &str = "NO_OUTBOUNDS";
    pub const MISSING_TAG: &str = "MISSING_TAG";
    pub const DUPLICATE_TAG: &str = "DUPLICATE_TAG";
    pub const UNKNOWN_PROTOCOL: &str = "UNKNOWN_PROTOCOL";
    pub const INVALID_PORT: &str = "INVALID_PORT";
    pub const PORT_CONFLICT: &str = "PORT_CONFLICT";
    pub const INVALID_SETTINGS: &str = "INVALID_SETTINGS";
    pub const NO_CLIENTS: &str = "NO_CLIENTS";
    pub const MISSING_CLIENT_ID: &str = "MISSING_CLIENT_ID";
    pub const INVALID_UUID: &str = "INVALID_UUID";
    pub const MISSING_EMAIL: &str = "MISSING_EMAIL";
    pub const DUPLICATE_EMAIL: &str = "DUPLICATE_EMAIL";
    pub const MISSING_PASSWORD: &str = "MISSING_PASSWORD";
    pub const WEAK_PASSWORD: &str = "WEAK_PASSWORD";
    pub const MISSING_ACCOUNTS: &str = "MISSING_ACCOUNTS";
    pub const INVALID_METHOD: &str = "INVALID_METHOD";
    pub const INVALID_SS2022_KEY: &str = "INVALID_SS2022_KEY";
    pub const INVALID_FLOW: &str = "INVALID_FLOW";
    pub const FLOW_TRANSPORT_MISMATCH: &str = "FLOW_TRANSPORT_MISMATCH";
    pub const UNKNOWN_NETWORK: &str = "UNKNOWN_NETWORK";
    pub const UNKNOWN_SECURITY: &str = "UNKNOWN_SECURITY";
    pub const TLS_NO_SERVER_NAME: &str = "TLS_NO_SERVER_NAME";
    pub const TLS_NO_CERTIFICATE: &str = "TLS_NO_CERTIFICATE";
    pub const TLS_INVALID_CERTIFICATE: &str = "TLS_INVALID_CERTIFICATE";
    pub const REALITY_PROTOCOL_MISMATCH: &str = "REALITY_PROTOCOL_MISMATCH";
    pub const REALITY_NO_PRIVATE_KEY: &str = "REALITY_NO_PRIVATE_KEY";
    pub const REALITY_NO_PUBLIC_KEY: &str = "REALITY_NO_PUBLIC_KEY";
    pub const REALITY_NO_SERVER_NAMES: &str = "REALITY_NO_SERVER_NAMES";
    pub const REALITY_NO_SHORT_IDS: &str = "REALITY_NO_SHORT_IDS";
    pub const REALITY_INVALID_SHORT_ID: &str = "REALITY_INVALID_SHORT_ID";
    pub const REALITY_NO_DEST: &str = "REALITY_NO_DEST";
    pub const GRPC_NO_SERVICE_NAME: &str = "GRPC_NO_SERVICE_NAME";
    pub const WS_INVALID_PATH: &str = "WS_INVALID_PATH";
    pub const MISSING_SERVER: &str = "MISSING_SERVER";
    pub const MISSING_ADDRESS: &str = "MISSING_ADDRESS";
    pub const DEFAULT_BLACKHOLE: &str = "DEFAULT_BLACKHOLE";
    pub const MISSING_OUTBOUND_TAG: &str = "MISSING_OUTBOUND_TAG";
    pub const UNKNOWN_OUTBOUND_TAG: &str = "UNKNOWN_OUTBOUND_TAG";
    pub const UNKNOWN_INBOUND_TAG: &str = "UNKNOWN_INBOUND_TAG";
    pub const EMPTY_RULE: &str = "EMPTY_RULE";
    pub const INVALID_NETWORK: &str = "INVALID_NETWORK";
}

pub const INBOUND_PROTOCOLS: &[&str] = &[
    "vless",
    "vmess",
    "trojan",
    "shadowsocks",
    "socks",
    "http",
    "dokodemo-door",
    "wireguard",
];

pub const OUTBOUND_PROTOCOLS: &[&str] = &[
    "freedom",
    "blackhole",
    "dns",
    "vless",
    "vmess",
    "trojan",
    "shadowsocks",
    "socks",
    "http",
    "wireguard",
    "loopback",
];

const NETWORKS: &[&str] = &[
    "tcp",
    "raw",
    "ws",
    "grpc",
    "http",
    "h2",
    "httpupgrade",
    "xhttp",
    "splithttp",
    "kcp",
    "quic",
];

const REALITY_NETWORKS: &[&str] = &["tcp", "raw", "grpc", "http", "h2", "xhttp", "splithttp"];

const SECURITIES: &[&str] = &["none", "tls", "reality"];

const SS_METHODS: &[&str] = &[
    "aes-128-gcm",
    "aes-256-gcm",
    "chacha20-poly1305",
    "chacha20-ietf-poly1305",
    "xchacha20-poly1305",
    "xchacha20-ietf-poly1305",
    "2022-blake3-aes-128-gcm",
    "2022-blake3-aes-256-gcm",
    "2022-blake3-chacha20-poly1305",
    "none",
    "plain",
];

const VLESS_FLOWS: &[&str] = &["xtls-rprx-vision", "xtls-rprx-vision-udp443"];

pub const MIN_CREDENTIAL_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }

    /// One line per error, for logs and alert payloads.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {} ({})", e.field, e.message, e.code))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Default)]
struct Findings {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Findings {
    fn error(&mut self, field: impl Into<String>, code: &str, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
            code: code.to_owned(),
        });
    }

    fn warn(&mut self, field: impl Into<String>, code: &str, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
            code: code.to_owned(),
        });
    }

    fn finish(self) -> ValidationResult {
        ValidationResult {
            valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Inbound,
    Outbound,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

pub fn validate(config: &ProxyConfig) -> ValidationResult {
    let mut findings = Findings::default();

    if config.inbounds.is_empty() {
        findings.warn("inbounds", codes::NO_INBOUNDS, "no inbounds configured");
    }
    let mut inbound_tags: HashSet<&str> = HashSet::new();
    let mut bound_ports: HashMap<(String, i64), usize> = HashMap::new();
    for (i, inbound) in config.inbounds.iter().enumerate() {
        check_inbound(&mut findings, i, inbound, &mut inbound_tags, &mut bound_ports);
    }

    if config.outbounds.is_empty() {
        findings.warn(
            "outbounds",
            codes::NO_OUTBOUNDS,
            "no outbounds configured; the engine falls back to direct",
        );
    } else if config.outbounds[0].protocol == "blackhole" {
        findings.warn(
            "outbounds[0].protocol",
            codes::DEFAULT_BLACKHOLE,
            "first outbound is blackhole; unmatched traffic will be dropped",
        );
    }
    let mut outbound_tags: HashSet<&str> = HashSet::new();
    for (i, outbound) in config.outbounds.iter().enumerate() {
        let path = format!("outbounds[{i}]");
        check_outbound(&mut findings, &path, outbound, &mut outbound_tags);
    }

    for (i, rule) in config.routing_rules.iter().enumerate() {
        let path = format!("routing.rules[{i}]");
        check_rule(&mut findings, &path, rule, &inbound_tags, &outbound_tags);
    }

    findings.finish()
}

/// Validates a raw engine document (`{inbounds, outbounds, routing}`).
///
/// A document that does not decode is reported as a single
/// `MALFORMED_CONFIG` error rather than rejected.
pub fn validate_value(raw: &Value) -> ValidationResult {
    match ProxyConfig::from_engine_json(raw) {
        Ok(config) => validate(&config),
        Err(e) => {
            let mut findings = Findings::default();
            findings.error("", codes::MALFORMED_CONFIG, e.to_string());
            findings.finish()
        }
    }
}

// ---------------------------------------------------------------------------
// Inbounds
// ---------------------------------------------------------------------------

fn check_inbound<'a>(
    f: &mut Findings,
    index: usize,
    inbound: &'a crate::model::InboundRecord,
    tags: &mut HashSet<&'a str>,
    bound_ports: &mut HashMap<(String, i64), usize>,
) {
    let path = format!("inbounds[{index}]");
    let tag = inbound.tag.trim();
    if tag.is_empty() {
        f.error(format!("{path}.tag"), codes::MISSING_TAG, "inbound tag is required");
    } else if !tags.insert(tag) {
        f.error(
            format!("{path}.tag"),
            codes::DUPLICATE_TAG,
            format!("inbound tag '{tag}' is used more than once"),
        );
    }

    let protocol = inbound.protocol.as_str();
    let known = INBOUND_PROTOCOLS.contains(&protocol);
    if !known {
        f.error(
            format!("{path}.protocol"),
            codes::UNKNOWN_PROTOCOL,
            format!("unsupported inbound protocol '{protocol}'"),
        );
    }

    match inbound.port {
        None => f.error(format!("{path}.port"), codes::INVALID_PORT, "port is required"),
        Some(port) if !(1..=65535).contains(&port) => f.error(
            format!("{path}.port"),
            codes::INVALID_PORT,
            format!("port {port} is outside 1-65535"),
        ),
        Some(port) => {
            let listen = inbound
                .listen
                .clone()
                .unwrap_or_else(|| "0.0.0.0".to_owned());
            match bound_ports.entry((listen, port)) {
                Entry::Occupied(first) => f.error(
                    format!("{path}.port"),
                    codes::PORT_CONFLICT,
                    format!(
                        "port {port} on {} is already used by inbounds[{}]",
                        first.key().0,
                        first.get()
                    ),
                ),
                Entry::Vacant(slot) => {
                    slot.insert(index);
                }
            }
        }
    }

    let settings_path = format!("{path}.settings");
    let settings = match &inbound.settings {
        Value::Object(_) => Some(&inbound.settings),
        Value::Null => None,
        _ => {
            f.error(
                &settings_path,
                codes::INVALID_SETTINGS,
                "settings must be an object",
            );
            None
        }
    };

    let stream = inbound.stream_settings.as_ref();
    let (network, security) = check_stream_settings(
        f,
        &format!("{path}.streamSettings"),
        stream,
        protocol,
        Direction::Inbound,
    );

    if known {
        let empty = Value::Object(Default::default());
        let settings = settings.unwrap_or(&empty);
        match protocol {
            "vless" | "vmess" => {
                check_uuid_clients(f, &settings_path, settings, protocol, &network, &security)
            }
            "trojan" => check_password_clients(f, &settings_path, settings),
            "shadowsocks" => check_shadowsocks_inbound(f, &settings_path, settings),
            "socks" | "http" => check_accounts(f, &settings_path, settings, protocol),
            _ => {}
        }
    }
}

fn check_uuid_clients(
    f: &mut Findings,
    path: &str,
    settings: &Value,
    protocol: &str,
    network: &str,
    security: &str,
) {
    let clients = match settings.get("clients") {
        Some(Value::Array(clients)) => clients,
        Some(Value::Null) | None => {
            f.warn(
                format!("{path}.clients"),
                codes::NO_CLIENTS,
                format!("{protocol} inbound has no clients"),
            );
            return;
        }
        Some(_) => {
            f.error(
                format!("{path}.clients"),
                codes::INVALID_SETTINGS,
                "clients must be an array",
            );
            return;
        }
    };
    if clients.is_empty() {
        f.warn(
            format!("{path}.clients"),
            codes::NO_CLIENTS,
            format!("{protocol} inbound has no clients"),
        );
    }

    let mut emails: HashSet<String> = HashSet::new();
    for (j, client) in clients.iter().enumerate() {
        let client_path = format!("{path}.clients[{j}]");
        match non_empty_str(client, "id") {
            None => f.error(
                format!("{client_path}.id"),
                codes::MISSING_CLIENT_ID,
                "client id is required",
            ),
            Some(id) if uuid::Uuid::parse_str(id).is_err() => f.error(
                format!("{client_path}.id"),
                codes::INVALID_UUID,
                format!("client id '{id}' is not a UUID"),
            ),
            Some(_) => {}
        }
        check_email(f, &client_path, client, &mut emails);

        if protocol == "vless" {
            if let Some(flow) = non_empty_str(client, "flow") {
                if !VLESS_FLOWS.contains(&flow) {
                    f.error(
                        format!("{client_path}.flow"),
                        codes::INVALID_FLOW,
                        format!("unknown flow '{flow}'"),
                    );
                } else if !matches!(network, "tcp" | "raw")
                    || !matches!(security, "tls" | "reality")
                {
                    f.error(
                        format!("{client_path}.flow"),
                        codes::FLOW_TRANSPORT_MISMATCH,
                        format!("flow '{flow}' requires tcp with tls or reality"),
                    );
                }
            }
        }
    }
}

fn check_password_clients(f: &mut Findings, path: &str, settings: &Value) {
    let clients = match settings.get("clients") {
        Some(Value::Array(clients)) if !clients.is_empty() => clients,
        Some(Value::Array(_)) | Some(Value::Null) | None => {
            f.warn(
                format!("{path}.clients"),
                codes::NO_CLIENTS,
                "trojan inbound has no clients",
            );
            return;
        }
        Some(_) => {
            f.error(
                format!("{path}.clients"),
                codes::INVALID_SETTINGS,
                "clients must be an array",
            );
            return;
        }
    };
    let mut emails: HashSet<String> = HashSet::new();
    for (j, client) in clients.iter().enumerate() {
        let client_path = format!("{path}.clients[{j}]");
        check_credential(f, &format!("{client_path}.password"), non_empty_str(client, "password"));
        check_email(f, &client_path, client, &mut emails);
    }
}

fn check_shadowsocks_inbound(f: &mut Findings, path: &str, settings: &Value) {
    let method = non_empty_str(settings, "method");
    let clients = settings
        .get("clients")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty());

    let Some(method) = method.or_else(|| {
        clients
            .and_then(|c| c.first())
            .and_then(|c| non_empty_str(c, "method"))
    }) else {
        f.error(
            format!("{path}.method"),
            codes::INVALID_METHOD,
            "shadowsocks method is required",
        );
        return;
    };
    if !SS_METHODS.contains(&method) {
        f.error(
            format!("{path}.method"),
            codes::INVALID_METHOD,
            format!("unsupported shadowsocks method '{method}'"),
        );
        return;
    }

    if let Some(key_len) = ss2022_key_len(method) {
        match non_empty_str(settings, "password") {
            None => f.error(
                format!("{path}.password"),
                codes::MISSING_PASSWORD,
                "shadowsocks 2022 requires a server key",
            ),
            Some(key) => check_ss2022_key(f, &format!("{path}.password"), key, key_len),
        }
        for (j, client) in clients.into_iter().flatten().enumerate() {
            let field = format!("{path}.clients[{j}].password");
            match non_empty_str(client, "password") {
                None => f.error(field, codes::MISSING_PASSWORD, "client key is required"),
                Some(key) => check_ss2022_key(f, &field, key, key_len),
            }
        }
        return;
    }

    match clients {
        Some(clients) => {
            let mut emails: HashSet<String> = HashSet::new();
            for (j, client) in clients.iter().enumerate() {
                let client_path = format!("{path}.clients[{j}]");
                check_credential(
                    f,
                    &format!("{client_path}.password"),
                    non_empty_str(client, "password"),
                );
                check_email(f, &client_path, client, &mut emails);
            }
        }
        None => check_credential(
            f,
            &format!("{path}.password"),
            non_empty_str(settings, "password"),
        ),
    }
}

fn ss2022_key_len(method: &str) -> Option<usize> {
    match method {
        "2022-blake3-aes-128-gcm" => Some(16),
        "2022-blake3-aes-256-gcm" | "2022-blake3-chacha20-poly1305" => Some(32),
        _ => None,
    }
}

fn check_ss2022_key(f: &mut Findings, field: &str, key: &str, expected_len: usize) {
    match STANDARD.decode(key) {
        Ok(bytes) if bytes.len() == expected_len => {}
        Ok(bytes) => f.error(
            field,
            codes::INVALID_SS2022_KEY,
            format!("key decodes to {} bytes, expected {expected_len}", bytes.len()),
        ),
        Err(_) => f.error(field, codes::INVALID_SS2022_KEY, "key is not valid base64"),
    }
}

fn check_accounts(f: &mut Findings, path: &str, settings: &Value, protocol: &str) {
    let accounts = settings.get("accounts").and_then(Value::as_array);
    let requires_auth = protocol == "socks" && non_empty_str(settings, "auth") == Some("password");
    if requires_auth && accounts.map_or(true, Vec::is_empty) {
        f.error(
            format!("{path}.accounts"),
            codes::MISSING_ACCOUNTS,
            "password auth requires at least one account",
        );
    }
    for (j, account) in accounts.into_iter().flatten().enumerate() {
        check_credential(
            f,
            &format!("{path}.accounts[{j}].pass"),
            non_empty_str(account, "pass"),
        );
    }
}

fn check_email(f: &mut Findings, client_path: &str, client: &Value, seen: &mut HashSet<String>) {
    match non_empty_str(client, "email") {
        None => f.warn(
            format!("{client_path}.email"),
            codes::MISSING_EMAIL,
            "client has no email; traffic cannot be attributed",
        ),
        Some(email) => {
            if !seen.insert(email.to_lowercase()) {
                f.error(
                    format!("{client_path}.email"),
                    codes::DUPLICATE_EMAIL,
                    format!("email '{email}' is used more than once on this inbound"),
                );
            }
        }
    }
}

/// Missing credentials are errors; short ones are warnings.
fn check_credential(f: &mut Findings, field: &str, value: Option<&str>) {
    match value {
        None => f.error(field, codes::MISSING_PASSWORD, "password is required"),
        Some(p) if p.chars().count() < MIN_CREDENTIAL_LEN => f.warn(
            field,
            codes::WEAK_PASSWORD,
            format!("password is shorter than {MIN_CREDENTIAL_LEN} characters"),
        ),
        Some(_) => {}
    }
}

// ---------------------------------------------------------------------------
// Transport settings
// ---------------------------------------------------------------------------

/// Returns the effective `(network, security)` pair.
fn check_stream_settings(
    f: &mut Findings,
    path: &str,
    stream: Option<&Value>,
    protocol: &str,
    direction: Direction,
) -> (String, String) {
    let Some(stream) = stream.filter(|s| !s.is_null()) else {
        return ("tcp".to_owned(), "none".to_owned());
    };
    if !stream.is_object() {
        f.error(path, codes::INVALID_SETTINGS, "streamSettings must be an object");
        return ("tcp".to_owned(), "none".to_owned());
    }

    let network = non_empty_str(stream, "network").unwrap_or("tcp").to_owned();
    if !NETWORKS.contains(&network.as_str()) {
        f.error(
            format!("{path}.network"),
            codes::UNKNOWN_NETWORK,
            format!("unsupported network '{network}'"),
        );
    }
    let security = non_empty_str(stream, "security").unwrap_or("none").to_owned();
    if !SECURITIES.contains(&security.as_str()) {
        f.error(
            format!("{path}.security"),
            codes::UNKNOWN_SECURITY,
            format!("unsupported security '{security}'"),
        );
    }

    match security.as_str() {
        "tls" => check_tls(f, &format!("{path}.tlsSettings"), stream.get("tlsSettings"), direction),
        "reality" => {
            if protocol != "vless" || !REALITY_NETWORKS.contains(&network.as_str()) {
                f.error(
                    format!("{path}.security"),
                    codes::REALITY_PROTOCOL_MISMATCH,
                    format!("reality is not supported for {protocol} over {network}"),
                );
            }
            check_reality(
                f,
                &format!("{path}.realitySettings"),
                stream.get("realitySettings"),
                direction,
            );
        }
        _ => {}
    }

    match network.as_str() {
        "grpc" => {
            let grpc = stream.get("grpcSettings");
            if grpc.and_then(|g| non_empty_str(g, "serviceName")).is_none() {
                f.error(
                    format!("{path}.grpcSettings.serviceName"),
                    codes::GRPC_NO_SERVICE_NAME,
                    "grpc transport requires serviceName",
                );
            }
        }
        "ws" => {
            if let Some(ws_path) = stream
                .get("wsSettings")
                .and_then(|ws| non_empty_str(ws, "path"))
            {
                if !ws_path.starts_with('/') {
                    f.warn(
                        format!("{path}.wsSettings.path"),
                        codes::WS_INVALID_PATH,
                        format!("websocket path '{ws_path}' should start with '/'"),
                    );
                }
            }
        }
        _ => {}
    }

    (network, security)
}

fn check_tls(f: &mut Findings, path: &str, tls: Option<&Value>, direction: Direction) {
    let empty = Value::Object(Default::default());
    let tls = tls.unwrap_or(&empty);
    if non_empty_str(tls, "serverName").is_none() {
        f.warn(
            format!("{path}.serverName"),
            codes::TLS_NO_SERVER_NAME,
            "tls without serverName",
        );
    }
    if direction == Direction::Outbound {
        return;
    }
    let certificates = tls
        .get("certificates")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty());
    let Some(certificates) = certificates else {
        f.error(
            format!("{path}.certificates"),
            codes::TLS_NO_CERTIFICATE,
            "inbound tls requires at least one certificate",
        );
        return;
    };
    for (k, cert) in certificates.iter().enumerate() {
        let from_files = non_empty_str(cert, "certificateFile").is_some()
            && non_empty_str(cert, "keyFile").is_some();
        let inline = has_items(cert, "certificate") && has_items(cert, "key");
        if !from_files && !inline {
            f.error(
                format!("{path}.certificates[{k}]"),
                codes::TLS_INVALID_CERTIFICATE,
                "certificate needs certificateFile and keyFile, or inline certificate and key",
            );
        }
    }
}

fn check_reality(f: &mut Findings, path: &str, reality: Option<&Value>, direction: Direction) {
    let empty = Value::Object(Default::default());
    let reality = reality.unwrap_or(&empty);

    if direction == Direction::Outbound {
        if non_empty_str(reality, "publicKey").is_none() {
            f.error(
                format!("{path}.publicKey"),
                codes::REALITY_NO_PUBLIC_KEY,
                "reality client requires publicKey",
            );
        }
        if non_empty_str(reality, "serverName").is_none() {
            f.error(
                format!("{path}.serverName"),
                codes::REALITY_NO_SERVER_NAMES,
                "reality client requires serverName",
            );
        }
        return;
    }

    if non_empty_str(reality, "privateKey").is_none() {
        f.error(
            format!("{path}.privateKey"),
            codes::REALITY_NO_PRIVATE_KEY,
            "reality requires privateKey",
        );
    }
    if non_empty_str(reality, "dest")
        .or_else(|| non_empty_str(reality, "target"))
        .is_none()
    {
        f.error(
            format!("{path}.dest"),
            codes::REALITY_NO_DEST,
            "reality requires dest",
        );
    }
    let server_names = reality
        .get("serverNames")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter(|n| is_non_empty_str(n)).count())
        .unwrap_or(0);
    if server_names == 0 {
        f.error(
            format!("{path}.serverNames"),
            codes::REALITY_NO_SERVER_NAMES,
            "reality requires at least one server name",
        );
    }
    match reality.get("shortIds").and_then(Value::as_array) {
        Some(ids) if !ids.is_empty() => {
            for (k, id) in ids.iter().enumerate() {
                let valid = id
                    .as_str()
                    .is_some_and(|s| s.len() <= 16 && s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit()));
                if !valid {
                    f.error(
                        format!("{path}.shortIds[{k}]"),
                        codes::REALITY_INVALID_SHORT_ID,
                        "short id must be even-length hex, at most 16 characters",
                    );
                }
            }
        }
        _ => f.error(
            format!("{path}.shortIds"),
            codes::REALITY_NO_SHORT_IDS,
            "reality requires at least one short id",
        ),
    }
}

// ---------------------------------------------------------------------------
// Outbounds
// ---------------------------------------------------------------------------

fn check_outbound<'a>(
    f: &mut Findings,
    path: &str,
    outbound: &'a crate::model::OutboundRecord,
    tags: &mut HashSet<&'a str>,
) {
    let tag = outbound.tag.trim();
    if tag.is_empty() {
        f.warn(
            format!("{path}.tag"),
            codes::MISSING_TAG,
            "outbound without a tag cannot be targeted by routing rules",
        );
    } else if !tags.insert(tag) {
        f.error(
            format!("{path}.tag"),
            codes::DUPLICATE_TAG,
            format!("outbound tag '{tag}' is used more than once"),
        );
    }

    let protocol = outbound.protocol.as_str();
    if !OUTBOUND_PROTOCOLS.contains(&protocol) {
        f.error(
            format!("{path}.protocol"),
            codes::UNKNOWN_PROTOCOL,
            format!("unsupported outbound protocol '{protocol}'"),
        );
        return;
    }

    let settings_path = format!("{path}.settings");
    let settings = match &outbound.settings {
        Value::Object(_) | Value::Null => &outbound.settings,
        _ => {
            f.error(
                &settings_path,
                codes::INVALID_SETTINGS,
                "settings must be an object",
            );
            return;
        }
    };

    check_stream_settings(
        f,
        &format!("{path}.streamSettings"),
        outbound.stream_settings.as_ref(),
        protocol,
        Direction::Outbound,
    );

    match protocol {
        "vless" | "vmess" => check_vnext(f, &settings_path, settings),
        "trojan" | "shadowsocks" | "socks" | "http" => {
            check_servers(f, &settings_path, settings, protocol)
        }
        _ => {}
    }
}

fn check_vnext(f: &mut Findings, path: &str, settings: &Value) {
    if let Some(servers) = settings.get("vnext").and_then(Value::as_array) {
        if servers.is_empty() {
            f.error(
                format!("{path}.vnext"),
                codes::MISSING_SERVER,
                "at least one server is required",
            );
        }
        for (k, server) in servers.iter().enumerate() {
            let server_path = format!("{path}.vnext[{k}]");
            check_address_port(f, &server_path, server);
            let users = server.get("users").and_then(Value::as_array);
            match users.filter(|u| !u.is_empty()) {
                None => f.error(
                    format!("{server_path}.users"),
                    codes::MISSING_CLIENT_ID,
                    "server requires at least one user",
                ),
                Some(users) => {
                    for (u, user) in users.iter().enumerate() {
                        check_outbound_uuid(f, &format!("{server_path}.users[{u}].id"), user);
                    }
                }
            }
        }
    } else if settings.get("address").is_some() {
        check_address_port(f, path, settings);
        check_outbound_uuid(f, &format!("{path}.id"), settings);
    } else {
        f.error(
            format!("{path}.vnext"),
            codes::MISSING_SERVER,
            "at least one server is required",
        );
    }
}

fn check_outbound_uuid(f: &mut Findings, field: &str, user: &Value) {
    match non_empty_str(user, "id") {
        None => f.error(field, codes::MISSING_CLIENT_ID, "user id is required"),
        Some(id) if uuid::Uuid::parse_str(id).is_err() => f.error(
            field,
            codes::INVALID_UUID,
            format!("user id '{id}' is not a UUID"),
        ),
        Some(_) => {}
    }
}

fn check_servers(f: &mut Findings, path: &str, settings: &Value, protocol: &str) {
    let servers = settings
        .get("servers")
        .and_then(Value::as_array)
        .filter(|s| !s.is_empty());
    let Some(servers) = servers else {
        f.error(
            format!("{path}.servers"),
            codes::MISSING_SERVER,
            "at least one server is required",
        );
        return;
    };
    for (k, server) in servers.iter().enumerate() {
        let server_path = format!("{path}.servers[{k}]");
        check_address_port(f, &server_path, server);
        match protocol {
            "trojan" => check_credential(
                f,
                &format!("{server_path}.password"),
                non_empty_str(server, "password"),
            ),
            "shadowsocks" => {
                match non_empty_str(server, "method") {
                    Some(method) if SS_METHODS.contains(&method) => {}
                    Some(method) => f.error(
                        format!("{server_path}.method"),
                        codes::INVALID_METHOD,
                        format!("unsupported shadowsocks method '{method}'"),
                    ),
                    None => f.error(
                        format!("{server_path}.method"),
                        codes::INVALID_METHOD,
                        "shadowsocks method is required",
                    ),
                }
                check_credential(
                    f,
                    &format!("{server_path}.password"),
                    non_empty_str(server, "password"),
                );
            }
            _ => {}
        }
    }
}

fn check_address_port(f: &mut Findings, path: &str, server: &Value) {
    if non_empty_str(server, "address").is_none() {
        f.error(
            format!("{path}.address"),
            codes::MISSING_ADDRESS,
            "server address is required",
        );
    }
    match server.get("port").and_then(Value::as_i64) {
        Some(port) if (1..=65535).contains(&port) => {}
        Some(port) => f.error(
            format!("{path}.port"),
            codes::INVALID_PORT,
            format!("port {port} is outside 1-65535"),
        ),
        None => f.error(format!("{path}.port"), codes::INVALID_PORT, "port is required"),
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

fn check_rule(
    f: &mut Findings,
    path: &str,
    rule: &crate::model::RoutingRuleRecord,
    inbound_tags: &HashSet<&str>,
    outbound_tags: &HashSet<&str>,
) {
    match (&rule.outbound_tag, &rule.balancer_tag) {
        (Some(tag), _) if !tag.trim().is_empty() => {
            if !outbound_tags.contains(tag.trim()) {
                f.error(
                    format!("{path}.outboundTag"),
                    codes::UNKNOWN_OUTBOUND_TAG,
                    format!("no outbound is tagged '{tag}'"),
                );
            }
        }
        (_, Some(balancer)) if !balancer.trim().is_empty() => {}
        _ => f.error(
            format!("{path}.outboundTag"),
            codes::MISSING_OUTBOUND_TAG,
            "rule needs an outboundTag or balancerTag",
        ),
    }

    let has_matcher = !rule.domain.is_empty()
        || !rule.ip.is_empty()
        || !rule.source.is_empty()
        || !rule.user.is_empty()
        || !rule.inbound_tag.is_empty()
        || !rule.protocol.is_empty()
        || rule.port.as_deref().is_some_and(|p| !p.trim().is_empty())
        || rule.network.as_deref().is_some_and(|n| !n.trim().is_empty());
    if !has_matcher {
        f.error(
            path,
            codes::EMPTY_RULE,
            "rule has no matcher and would catch all traffic",
        );
    }

    for (k, tag) in rule.inbound_tag.iter().enumerate() {
        if !inbound_tags.contains(tag.as_str()) {
            f.warn(
                format!("{path}.inboundTag[{k}]"),
                codes::UNKNOWN_INBOUND_TAG,
                format!("no inbound is tagged '{tag}'"),
            );
        }
    }

    if let Some(port) = rule.port.as_deref().filter(|p| !p.trim().is_empty()) {
        if !is_valid_port_list(port) {
            f.error(
                format!("{path}.port"),
                codes::INVALID_PORT,
                format!("'{port}' is not a port, range, or comma-separated list"),
            );
        }
    }

    if let Some(network) = rule.network.as_deref().filter(|n| !n.trim().is_empty()) {
        let ok = network
            .split(',')
            .all(|n| matches!(n.trim(), "tcp" | "udp"));
        if !ok {
            f.error(
                format!("{path}.network"),
                codes::INVALID_NETWORK,
                format!("'{network}' must be tcp, udp, or tcp,udp"),
            );
        }
    }
}

fn is_valid_port_list(ports: &str) -> bool {
    ports.split(',').all(|part| {
        let part = part.trim();
        let parse = |s: &str| s.trim().parse::<u32>().ok().filter(|p| (1..=65535).contains(p));
        match part.split_once('-') {
            Some((lo, hi)) => matches!((parse(lo), parse(hi)), (Some(lo), Some(hi)) if lo <= hi),
            None => parse(part).is_some(),
        }
    })
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn is_non_empty_str(value: &Value) -> bool {
    value.as_str().is_some_and(|s| !s.trim().is_empty())
}

fn has_items(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::String(s)) => !s.trim().is_empty(),
        _ => false,
    }
}
