//! Expansion of services, targets and credentials into the flat task list.

use ipnetwork::IpNetwork;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tracing::debug;
use url::Host;

use super::model::{Options, Task};
use super::uri::{parse_uri, split_values, UriComponents};
use crate::error::{Error, Result};
use crate::services::ServiceRegistry;

/// Largest CIDR block expanded into individual targets.
pub const MAX_SUBNET_SIZE: u64 = 65536;

pub const DEFAULT_COMBO_DELIMITER: &str = ":";

/// A service name with its explicit port list (empty when none was given).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub ports: Vec<u16>,
}

/// A host with an optional explicit port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub host: String,
    pub port: Option<u16>,
}

pub type CredentialPair = (String, String);

fn parse_port(raw: &str, context: &str) -> Result<u16> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| Error::configuration(format!("Invalid port `{}` in `{}`", raw, context)))
}

/// Parses `name` or `name:port[,port...]`.
pub fn expand_service_spec(registry: &ServiceRegistry, spec: &str) -> Result<ServiceSpec> {
    let spec = spec.trim();
    let (name, ports) = match spec.split_once(':') {
        Some((name, list)) => {
            let ports = list
                .split(',')
                .filter(|p| !p.trim().is_empty())
                .map(|p| parse_port(p, spec))
                .collect::<Result<Vec<_>>>()?;
            (name.trim(), ports)
        }
        None => (spec, Vec::new()),
    };

    if name.is_empty() {
        return Err(Error::configuration(format!("Service spec `{}` has no name", spec)));
    }
    if ports.is_empty() && !registry.contains(name) {
        return Err(Error::configuration(format!(
            "Unknown service `{}` and no port given, cannot infer a default port",
            name
        )));
    }

    Ok(ServiceSpec {
        name: name.to_string(),
        ports,
    })
}

fn subnet_size(net: &IpNetwork) -> u64 {
    let bits: u32 = match net {
        IpNetwork::V4(_) => 32,
        IpNetwork::V6(_) => 128,
    };
    let exp = bits.saturating_sub(net.prefix() as u32);
    if exp > 63 {
        u64::MAX
    } else {
        1u64 << exp
    }
}

/// Rejects hosts no client could address, such as names with spaces.
fn check_host(host: &str, spec: &str) -> Result<()> {
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    Host::parse(host)
        .map(|_| ())
        .map_err(|e| Error::configuration(format!("Invalid host `{}` in target `{}`: {}", host, spec, e)))
}

/// Parses `host`, `host:port`, `[v6]:port`, a bare IPv6 address or a CIDR
/// block. A CIDR block expands to one target per address.
pub fn expand_target(spec: &str) -> Result<Vec<TargetSpec>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(Error::data("Empty target"));
    }

    if spec.contains('/') {
        let net = spec
            .parse::<IpNetwork>()
            .map_err(|e| Error::configuration(format!("Invalid subnet `{}`: {}", spec, e)))?;
        let size = subnet_size(&net);
        if size > MAX_SUBNET_SIZE {
            return Err(Error::configuration(format!(
                "Subnet `{}` too large ({} addresses, maximum {})",
                spec, size, MAX_SUBNET_SIZE
            )));
        }
        return Ok(net
            .iter()
            .map(|ip| TargetSpec {
                host: ip.to_string(),
                port: None,
            })
            .collect());
    }

    if let Some(rest) = spec.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::configuration(format!("Unterminated IPv6 target `{}`", spec)))?;
        let port = match after.strip_prefix(':') {
            Some(raw) => Some(parse_port(raw, spec)?),
            None if after.is_empty() => None,
            None => return Err(Error::configuration(format!("Invalid target `{}`", spec))),
        };
        check_host(host, spec)?;
        return Ok(vec![TargetSpec {
            host: host.to_string(),
            port,
        }]);
    }

    // More than one colon without brackets is an IPv6 literal with no port.
    let target = match spec.matches(':').count() {
        1 => {
            let (host, raw) = spec.split_once(':').unwrap_or((spec, ""));
            TargetSpec {
                host: host.to_string(),
                port: Some(parse_port(raw, spec)?),
            }
        }
        _ => TargetSpec {
            host: spec.to_string(),
            port: None,
        },
    };
    check_host(&target.host, spec)?;
    Ok(vec![target])
}

/// Splits a combo line at the first delimiter.
pub fn parse_combo_line(line: &str, delimiter: &str) -> Result<CredentialPair> {
    let delimiter = if delimiter.is_empty() { DEFAULT_COMBO_DELIMITER } else { delimiter };
    line.trim()
        .split_once(delimiter)
        .map(|(user, secret)| (user.to_string(), secret.to_string()))
        .ok_or_else(|| {
            Error::data(format!(
                "Combo line `{}` has no `{}` delimiter",
                line.trim(),
                delimiter
            ))
        })
}

/// Usernames x secrets, followed by every combo pair.
pub fn build_credential_pairs(
    usernames: &[String],
    secrets: &[String],
    combo_lines: &[String],
    delimiter: &str,
) -> Result<Vec<CredentialPair>> {
    let mut pairs = Vec::with_capacity(usernames.len() * secrets.len() + combo_lines.len());
    for username in usernames {
        for secret in secrets {
            pairs.push((username.clone(), secret.clone()));
        }
    }
    for line in combo_lines {
        pairs.push(parse_combo_line(line, delimiter)?);
    }
    Ok(pairs)
}

/// Parses `service:key=value[,key=value...]`.
pub fn parse_option_spec(spec: &str) -> Result<(String, Options)> {
    let (service, body) = spec
        .split_once(':')
        .ok_or_else(|| Error::configuration(format!("Malformed options `{}`: expected service:key=value", spec)))?;
    let service = service.trim();
    if service.is_empty() {
        return Err(Error::configuration(format!("Malformed options `{}`: missing service", spec)));
    }

    let mut options = Options::new();
    for entry in body.split(',').filter(|e| !e.trim().is_empty()) {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| Error::configuration(format!("Malformed option `{}` in `{}`", entry, spec)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::configuration(format!("Malformed option `{}` in `{}`", entry, spec)));
        }
        options.insert(key.to_string(), value.trim().to_string());
    }
    if options.is_empty() {
        return Err(Error::configuration(format!("Malformed options `{}`: no key=value pairs", spec)));
    }
    Ok((service.to_string(), options))
}

fn resolve_ports(
    registry: &ServiceRegistry,
    service: &ServiceSpec,
    target: &TargetSpec,
    global_ports: &[u16],
) -> Result<Vec<u16>> {
    if let Some(port) = target.port {
        return Ok(vec![port]);
    }
    if !service.ports.is_empty() {
        return Ok(service.ports.clone());
    }
    if !global_ports.is_empty() {
        return Ok(global_ports.to_vec());
    }
    registry
        .default_port(&service.name)
        .map(|port| vec![port])
        .ok_or_else(|| {
            Error::configuration(format!(
                "Cannot resolve a port for service `{}` on `{}`",
                service.name, target.host
            ))
        })
}

/// One task per service x target x resolved port x credential pair.
///
/// An explicit target port replaces the port fan-out for that target. Port
/// precedence otherwise: the service spec's list, `global_ports`, the
/// registry default.
pub fn build_tasks(
    registry: &ServiceRegistry,
    services: &[ServiceSpec],
    targets: &[TargetSpec],
    pairs: &[CredentialPair],
    global_ports: &[u16],
    per_service_options: &HashMap<String, Options>,
) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for service in services {
        let options = per_service_options.get(&service.name);
        for target in targets {
            for port in resolve_ports(registry, service, target, global_ports)? {
                for (username, secret) in pairs {
                    let mut task = Task::new(&service.name, port, &target.host, username, secret);
                    if let Some(options) = options {
                        task = task.with_options(options.clone());
                    }
                    tasks.push(task);
                }
            }
        }
    }
    Ok(tasks)
}

/// Removes duplicates, keeping the first occurrence.
fn unique(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}

/// Collects loosely structured input (CLI values, file contents, a URI) and
/// turns it into tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskBuilder {
    services: Vec<String>,
    usernames: Vec<String>,
    secrets: Vec<String>,
    targets: Vec<String>,
    ports: Vec<String>,
    combo_lines: Vec<String>,
    combo_delimiter: Option<String>,
    option_specs: Vec<String>,
    uri: Option<String>,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn services<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn usernames<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.usernames.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn secrets<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secrets.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn targets<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn ports<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ports.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn combo_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.combo_lines.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn combo_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.combo_delimiter = Some(delimiter.into());
        self
    }

    /// Adds a `service:key=value[,key=value]` option spec.
    pub fn option_spec(mut self, spec: impl Into<String>) -> Self {
        self.option_specs.push(spec.into());
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Validates the collected input and expands it into tasks. Fails before
    /// producing anything when a required category is missing or any spec is
    /// malformed.
    pub fn build(self, registry: &ServiceRegistry) -> Result<Vec<Task>> {
        let uri = match &self.uri {
            Some(raw) => parse_uri(registry, raw)?,
            None => UriComponents::default(),
        };

        let mut option_map: HashMap<String, Options> = HashMap::new();
        for spec in &self.option_specs {
            let (service, options) = parse_option_spec(spec)?;
            option_map.entry(service).or_default().extend(options);
        }

        // URI fields take precedence; the CLI only fills what the URI left unset.
        let (service_specs, global_ports) = if uri.services.is_empty() {
            (unique(self.services), self.ports)
        } else {
            let specs = uri
                .services
                .iter()
                .map(|name| match uri.port {
                    Some(port) => format!("{}:{}", name, port),
                    None => name.clone(),
                })
                .collect();
            if !uri.options.is_empty() {
                for name in &uri.services {
                    option_map
                        .entry(name.clone())
                        .or_default()
                        .extend(uri.options.clone());
                }
            }
            (unique(specs), Vec::new())
        };
        let targets = unique(if uri.hosts.is_empty() { self.targets } else { uri.hosts });
        let usernames = unique(if uri.usernames.is_empty() { self.usernames } else { uri.usernames });
        let secrets = unique(if uri.secrets.is_empty() { self.secrets } else { uri.secrets });

        if service_specs.is_empty() {
            return Err(Error::data("Missing argument `services`"));
        }
        if targets.is_empty() {
            return Err(Error::data("Missing argument `targets`"));
        }
        if usernames.is_empty() && secrets.is_empty() && self.combo_lines.is_empty() {
            return Err(Error::data("No usernames, secrets or combos given, nothing to test"));
        }
        if !usernames.is_empty() && secrets.is_empty() {
            return Err(Error::data("Missing argument `secrets`"));
        }
        if usernames.is_empty() && !secrets.is_empty() {
            return Err(Error::data("Missing argument `usernames`"));
        }

        let delimiter = self
            .combo_delimiter
            .as_deref()
            .unwrap_or(DEFAULT_COMBO_DELIMITER);
        let pairs = build_credential_pairs(&usernames, &secrets, &self.combo_lines, delimiter)?;

        let services = service_specs
            .iter()
            .map(|spec| expand_service_spec(registry, spec))
            .collect::<Result<Vec<_>>>()?;
        let targets = targets
            .iter()
            .map(|spec| expand_target(spec))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        let global_ports = global_ports
            .iter()
            .flat_map(|raw| split_values(raw))
            .map(|raw| parse_port(&raw, "ports"))
            .collect::<Result<Vec<_>>>()?;

        let tasks = build_tasks(registry, &services, &targets, &pairs, &global_ports, &option_map)?;
        debug!(
            "Built {} tasks from {} services, {} targets and {} credential pairs",
            tasks.len(),
            services.len(),
            targets.len(),
            pairs.len()
        );
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::builtin()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn service_spec_with_and_without_ports() {
        let reg = registry();
        assert_eq!(
            expand_service_spec(&reg, "ssh").unwrap(),
            ServiceSpec { name: "ssh".into(), ports: vec![] }
        );
        assert_eq!(
            expand_service_spec(&reg, "ssh:9991,9992,22").unwrap().ports,
            vec![9991, 9992, 22]
        );
        // Unknown services are fine as long as the port is explicit.
        assert_eq!(expand_service_spec(&reg, "custom:7000").unwrap().ports, vec![7000]);
    }

    #[test]
    fn unknown_service_without_port_is_a_configuration_error() {
        let err = expand_service_spec(&registry(), "telnet").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        let err = expand_service_spec(&registry(), "ssh:abc").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn target_forms() {
        assert_eq!(
            expand_target("example.com").unwrap(),
            vec![TargetSpec { host: "example.com".into(), port: None }]
        );
        assert_eq!(expand_target("example.com:2222").unwrap()[0].port, Some(2222));
        assert_eq!(
            expand_target("[::1]:22").unwrap(),
            vec![TargetSpec { host: "::1".into(), port: Some(22) }]
        );
        assert_eq!(expand_target("fe80::1").unwrap()[0].port, None);
        assert!(expand_target("host:port").is_err());
    }

    #[test]
    fn malformed_hosts_are_configuration_errors() {
        for spec in ["bad host", "bad host:8080", "[not v6]:22", ":22", "a/b#c"] {
            let err = expand_target(spec).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{}: {:?}", spec, err);
        }
        assert!(expand_target("under_score.local").is_ok());
    }

    #[test]
    fn bad_host_fails_the_whole_build() {
        let err = TaskBuilder::new()
            .services(["http-basic:1"])
            .targets(["127.0.0.1", "bad host"])
            .usernames(["u"])
            .secrets(["p"])
            .build(&registry())
            .unwrap_err();
        assert!(err.to_string().contains("bad host"), "{}", err);
    }

    #[test]
    fn cidr_targets_expand() {
        let hosts: Vec<String> = expand_target("192.168.1.0/30")
            .unwrap()
            .into_iter()
            .map(|t| t.host)
            .collect();
        assert_eq!(hosts, vec!["192.168.1.0", "192.168.1.1", "192.168.1.2", "192.168.1.3"]);
        assert!(matches!(expand_target("10.0.0.0/8"), Err(Error::Configuration(_))));
    }

    #[test]
    fn combos_are_appended_to_cross_product() {
        let pairs = build_credential_pairs(
            &strings(&["root", "admin"]),
            &strings(&["toor"]),
            &strings(&["guest:guest", "svc:a:b"]),
            ":",
        )
        .unwrap();
        assert_eq!(
            pairs,
            vec![
                ("root".to_string(), "toor".to_string()),
                ("admin".to_string(), "toor".to_string()),
                ("guest".to_string(), "guest".to_string()),
                ("svc".to_string(), "a:b".to_string()),
            ]
        );
    }

    #[test]
    fn combo_line_without_delimiter_is_a_data_error() {
        let err = build_credential_pairs(&[], &[], &strings(&["lonely"]), ":").unwrap_err();
        assert!(matches!(err, Error::Data(_)));
        assert_eq!(parse_combo_line("a;b", ";").unwrap(), ("a".to_string(), "b".to_string()));
    }

    #[test]
    fn task_count_is_the_full_product() {
        let tasks = TaskBuilder::new()
            .services(["ssh:22,2222", "ftp"])
            .usernames(["root", "guest"])
            .secrets(["a", "b", "c"])
            .targets(["h1", "h2"])
            .build(&registry())
            .unwrap();
        // (2 ssh ports + 1 ftp port) x 2 targets x 2 usernames x 3 secrets
        assert_eq!(tasks.len(), 3 * 2 * 2 * 3);
    }

    #[test]
    fn explicit_target_port_overrides_service_ports() {
        let tasks = TaskBuilder::new()
            .services(["ssh:22,2222,2200"])
            .usernames(["root"])
            .secrets(["toor"])
            .targets(["h1:9000", "h2"])
            .build(&registry())
            .unwrap();
        let h1: Vec<u16> = tasks.iter().filter(|t| t.host == "h1").map(|t| t.port).collect();
        let h2: Vec<u16> = tasks.iter().filter(|t| t.host == "h2").map(|t| t.port).collect();
        assert_eq!(h1, vec![9000]);
        assert_eq!(h2, vec![22, 2222, 2200]);
    }

    #[test]
    fn default_and_global_ports() {
        let tasks = TaskBuilder::new()
            .services(["ssh"])
            .usernames(["u"])
            .secrets(["p"])
            .targets(["h"])
            .build(&registry())
            .unwrap();
        assert_eq!(tasks, vec![Task::new("ssh", 22, "h", "u", "p")]);

        let tasks = TaskBuilder::new()
            .services(["ssh"])
            .usernames(["u"])
            .secrets(["p"])
            .targets(["h"])
            .ports(["2222+2223"])
            .build(&registry())
            .unwrap();
        let ports: Vec<u16> = tasks.iter().map(|t| t.port).collect();
        assert_eq!(ports, vec![2222, 2223]);
    }

    #[test]
    fn missing_inputs_fail_fast() {
        let reg = registry();
        let err = TaskBuilder::new().build(&reg).unwrap_err();
        assert_eq!(err.to_string(), "Data error: Missing argument `services`");

        let err = TaskBuilder::new().services(["ssh"]).build(&reg).unwrap_err();
        assert_eq!(err.to_string(), "Data error: Missing argument `targets`");

        let err = TaskBuilder::new()
            .services(["ssh"])
            .targets(["h"])
            .build(&reg)
            .unwrap_err();
        assert!(err.to_string().contains("nothing to test"));

        let err = TaskBuilder::new()
            .services(["ssh"])
            .targets(["h"])
            .usernames(["root"])
            .build(&reg)
            .unwrap_err();
        assert_eq!(err.to_string(), "Data error: Missing argument `secrets`");

        let err = TaskBuilder::new()
            .services(["ssh"])
            .targets(["h"])
            .secrets(["x"])
            .build(&reg)
            .unwrap_err();
        assert_eq!(err.to_string(), "Data error: Missing argument `usernames`");
    }

    #[test]
    fn combos_alone_are_enough() {
        let tasks = TaskBuilder::new()
            .services(["ftp"])
            .targets(["h"])
            .combo_lines(["anonymous:anonymous"])
            .build(&registry())
            .unwrap();
        assert_eq!(tasks, vec![Task::new("ftp", 21, "h", "anonymous", "anonymous")]);
    }

    #[test]
    fn uri_takes_precedence_over_cli_values() {
        let tasks = TaskBuilder::new()
            .services(["http-basic"])
            .usernames(["user"])
            .secrets(["P@55w0rd!"])
            .ports(["80+8080"])
            .uri("ssh://10.0.0.9:2222")
            .build(&registry())
            .unwrap();
        assert_eq!(tasks, vec![Task::new("ssh", 2222, "10.0.0.9", "user", "P@55w0rd!")]);
    }

    #[test]
    fn uri_without_port_uses_service_default() {
        let tasks = TaskBuilder::new()
            .secrets(["P@55w0rd!"])
            .uri("ssh://user+user2@10.0.0.9")
            .build(&registry())
            .unwrap();
        let lines: Vec<String> = tasks.iter().map(|t| t.connection_string()).collect();
        assert_eq!(
            lines,
            vec!["ssh://user:P@55w0rd!@10.0.0.9:22", "ssh://user2:P@55w0rd!@10.0.0.9:22"]
        );
    }

    #[test]
    fn uri_options_attach_to_uri_services() {
        let tasks = TaskBuilder::new()
            .usernames(["admin"])
            .secrets(["admin"])
            .uri("http-basic://web:8080/secret/")
            .build(&registry())
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].option("path"), Some("/secret/"));
    }

    #[test]
    fn option_specs_apply_per_service() {
        let tasks = TaskBuilder::new()
            .services(["http-basic", "ssh"])
            .usernames(["u"])
            .secrets(["p"])
            .targets(["h"])
            .option_spec("http-basic:path=/admin/,query=x=1")
            .build(&registry())
            .unwrap();
        let http = tasks.iter().find(|t| t.service == "http-basic").unwrap();
        let ssh = tasks.iter().find(|t| t.service == "ssh").unwrap();
        assert_eq!(http.option("path"), Some("/admin/"));
        assert_eq!(http.option("query"), Some("x=1"));
        assert!(ssh.options.is_none());
    }

    #[test]
    fn malformed_option_specs_are_configuration_errors() {
        assert!(matches!(parse_option_spec("http-basic"), Err(Error::Configuration(_))));
        assert!(matches!(parse_option_spec("http-basic:path"), Err(Error::Configuration(_))));
        assert!(matches!(parse_option_spec(":path=/"), Err(Error::Configuration(_))));
        assert!(matches!(parse_option_spec("ftp:=x"), Err(Error::Configuration(_))));
    }

    #[test]
    fn duplicate_inputs_are_collapsed() {
        let tasks = TaskBuilder::new()
            .services(["ssh", "ssh"])
            .usernames(["root", "root"])
            .secrets(["toor"])
            .targets(["h"])
            .build(&registry())
            .unwrap();
        assert_eq!(tasks.len(), 1);
    }
}
