use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::model::routing::{is_valid_router_id, RouterId, INFINITY};

pub const MIN_PORT: u16 = 1024;
pub const MAX_PORT: u16 = 64_000;

/// One configured neighbor: the local port its updates arrive on, the
/// remote port its daemon listens on, and the cost of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    pub input_port: u16,
    pub output_port: u16,
    pub metric: u8,
    pub neighbor_id: RouterId,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub router_id: RouterId,
    pub links: Vec<LinkConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("expected exactly three content lines (router-id, input-ports, outputs), found {0}")]
    LineCount(usize),
    #[error("malformed {kind} line: {line:?}")]
    MalformedLine { kind: &'static str, line: String },
    #[error("router id {0:?} is not an integer in [1, 64000]")]
    BadRouterId(String),
    #[error("port {0:?} is not an integer in [1024, 64000]")]
    BadPort(String),
    #[error("port {0} is used more than once")]
    DuplicatePort(u16),
    #[error("metric {0:?} is not an integer in [1, 16]")]
    BadMetric(String),
    #[error("neighbor router id {0:?} is not an integer in [1, 64000]")]
    BadNeighborId(String),
    #[error("output {0:?} is not of the form port-metric-routerid")]
    BadOutput(String),
    #[error("{inputs} input ports but {outputs} outputs; they must map one-to-one")]
    CountMismatch { inputs: usize, outputs: usize },
}

pub fn load_config(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let text = fs::read_to_string(path)?;
    parse_config(&text)
}

/// Parse the three-line router configuration. Blank lines and lines whose
/// first non-blank character is `#` are ignored; the remaining lines must
/// be, in order: `router-id N`, `input-ports P1, P2, ...` and
/// `outputs P-M-I, ...` with one output per input port.
pub fn parse_config(text: &str) -> Result<DaemonConfig, ConfigError> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    if lines.len() != 3 {
        return Err(ConfigError::LineCount(lines.len()));
    }

    let router_id = parse_router_id(lines[0])?;
    let input_ports = parse_input_ports(lines[1])?;
    let outputs = parse_outputs(lines[2], &input_ports)?;
    if outputs.len() != input_ports.len() {
        return Err(ConfigError::CountMismatch {
            inputs: input_ports.len(),
            outputs: outputs.len(),
        });
    }

    // Input and output ports map one-to-one by position.
    let links = input_ports
        .into_iter()
        .zip(outputs)
        .map(|(input_port, (output_port, metric, neighbor_id))| LinkConfig {
            input_port,
            output_port,
            metric,
            neighbor_id,
        })
        .collect();

    Ok(DaemonConfig { router_id, links })
}

fn parse_router_id(line: &str) -> Result<RouterId, ConfigError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 2 || fields[0] != "router-id" {
        return Err(ConfigError::MalformedLine {
            kind: "router-id",
            line: line.to_string(),
        });
    }
    let id = fields[1]
        .parse::<RouterId>()
        .map_err(|_| ConfigError::BadRouterId(fields[1].to_string()))?;
    if !is_valid_router_id(id) {
        return Err(ConfigError::BadRouterId(fields[1].to_string()));
    }
    Ok(id)
}

fn parse_input_ports(line: &str) -> Result<Vec<u16>, ConfigError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 2 || fields[0] != "input-ports" {
        return Err(ConfigError::MalformedLine {
            kind: "input-ports",
            line: line.to_string(),
        });
    }

    let mut ports = Vec::with_capacity(fields.len() - 1);
    let mut seen = BTreeSet::new();
    for field in &fields[1..] {
        let port = parse_port(field)?;
        if !seen.insert(port) {
            return Err(ConfigError::DuplicatePort(port));
        }
        ports.push(port);
    }
    Ok(ports)
}

fn parse_outputs(
    line: &str,
    input_ports: &[u16],
) -> Result<Vec<(u16, u8, RouterId)>, ConfigError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 2 || fields[0] != "outputs" {
        return Err(ConfigError::MalformedLine {
            kind: "outputs",
            line: line.to_string(),
        });
    }

    let mut outputs = Vec::with_capacity(fields.len() - 1);
    let mut seen = BTreeSet::new();
    for field in &fields[1..] {
        let triple = field.trim_matches(',');
        let parts: Vec<&str> = triple.split('-').collect();
        if parts.len() != 3 {
            return Err(ConfigError::BadOutput(triple.to_string()));
        }
        let (port, metric, neighbor_id) = (parts[0], parts[1], parts[2]);

        let port = parse_port(port)?;
        // Output ports must be disjoint from every input port and from
        // each other.
        if input_ports.contains(&port) || !seen.insert(port) {
            return Err(ConfigError::DuplicatePort(port));
        }

        let metric = metric
            .parse::<u8>()
            .ok()
            .filter(|metric| (1..=INFINITY).contains(metric))
            .ok_or_else(|| ConfigError::BadMetric(metric.to_string()))?;
        let neighbor_id = neighbor_id
            .parse::<RouterId>()
            .ok()
            .filter(|id| is_valid_router_id(*id))
            .ok_or_else(|| ConfigError::BadNeighborId(neighbor_id.to_string()))?;

        outputs.push((port, metric, neighbor_id));
    }
    Ok(outputs)
}

fn parse_port(field: &str) -> Result<u16, ConfigError> {
    let token = field.trim_matches(',');
    token
        .parse::<u16>()
        .ok()
        .filter(|port| (MIN_PORT..=MAX_PORT).contains(port))
        .ok_or_else(|| ConfigError::BadPort(token.to_string()))
}
