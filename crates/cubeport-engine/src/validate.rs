//! Request validation.
//!
//! Everything here runs before the store or the runtime is touched.

use cubeport_proxy::validate_domain;
use cubeport_state::{CubeSpec, ProxyRoute};

use crate::error::{EngineError, EngineResult};

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::Validation(msg.into())
}

pub fn workspace_name(name: &str) -> EngineResult<()> {
    if name.trim().is_empty() {
        return Err(invalid("workspace name is required"));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("workspace name contains control characters"));
    }
    Ok(())
}

/// Container names as accepted by docker: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
pub fn container_name(name: &str) -> EngineResult<()> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("cube name is required")),
        Some(c) if !c.is_ascii_alphanumeric() => {
            return Err(invalid(format!(
                "cube name '{name}' must start with a letter or digit"
            )));
        }
        Some(_) => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
        return Err(invalid(format!(
            "cube name '{name}' may only contain letters, digits, '_', '.' and '-'"
        )));
    }
    Ok(())
}

fn image_reference(image: &str, what: &str) -> EngineResult<()> {
    if image.is_empty() {
        return Err(invalid(format!("{what} is required")));
    }
    if image.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid(format!("{what} '{image}' contains whitespace")));
    }
    Ok(())
}

/// `[ip:]host:container[/proto]`, every port numeric.
fn port_mapping(mapping: &str) -> bool {
    let ports = mapping.split_once('/').map_or(mapping, |(ports, _)| ports);
    let parts: Vec<&str> = ports.rsplitn(3, ':').collect();
    if parts.len() < 2 {
        return false;
    }
    let numeric = |p: &str| !p.is_empty() && p.split('-').all(|n| n.parse::<u16>().is_ok());
    numeric(parts[0]) && numeric(parts[1])
}

/// Docker's size syntax: a decimal number, then an optional unit from
/// `kmgtp`, an optional `i` and an optional `b`, case-insensitive.
fn memory_limit(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    let mut rest = lower.strip_suffix('b').unwrap_or(&lower);
    rest = rest.strip_suffix('i').unwrap_or(rest);
    rest = rest
        .strip_suffix(|c: char| matches!(c, 'k' | 'm' | 'g' | 't' | 'p'))
        .unwrap_or(rest);
    let number = rest.strip_suffix(' ').unwrap_or(rest);

    let (whole, fraction) = number.split_once('.').unwrap_or((number, "0"));
    let digits = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
    digits(whole) && digits(fraction)
}

pub fn cube_spec(spec: &CubeSpec) -> EngineResult<()> {
    container_name(&spec.name)?;
    image_reference(&spec.image, "image")?;
    let name = &spec.name;

    if let Some(bad) = spec.ports.iter().find(|p| !port_mapping(p)) {
        return Err(invalid(format!(
            "cube '{name}': port mapping '{bad}' is not host:container"
        )));
    }
    if let Some(bad) = spec
        .environment_vars
        .iter()
        .find(|e| e.split_once('=').is_none_or(|(k, _)| k.is_empty()))
    {
        return Err(invalid(format!(
            "cube '{name}': environment entry '{bad}' is not KEY=value"
        )));
    }
    if let Some(bad) = spec
        .labels
        .iter()
        .find(|l| l.is_empty() || l.starts_with('='))
    {
        return Err(invalid(format!("cube '{name}': label '{bad}' has no key")));
    }
    for (host, container) in &spec.volumes {
        if host.is_empty() || !container.starts_with('/') {
            return Err(invalid(format!(
                "cube '{name}': volume '{host}:{container}' needs a host path and an absolute container path"
            )));
        }
    }
    let limits = &spec.resource_limits;
    if let Some(cpus) = limits.cpus.as_deref().filter(|c| !c.is_empty()) {
        if !cpus.parse::<f64>().is_ok_and(|v| v > 0.0) {
            return Err(invalid(format!(
                "cube '{name}': cpus '{cpus}' is not a positive number"
            )));
        }
    }
    if let Some(memory) = limits.memory.as_deref().filter(|m| !m.is_empty()) {
        if !memory_limit(memory) {
            return Err(invalid(format!(
                "cube '{name}': memory '{memory}' is not a size like 512m"
            )));
        }
    }
    Ok(())
}

/// Validate a route and lower-case its domain.
pub fn proxy_route(route: &ProxyRoute) -> EngineResult<ProxyRoute> {
    let mut route = route.clone();
    route.domain = route.domain.trim().to_ascii_lowercase();
    validate_domain(&route.domain).map_err(|e| invalid(e.to_string()))?;
    if route.port == 0 {
        return Err(invalid(format!("proxy '{}': port must be non-zero", route.domain)));
    }
    if route.route_type.trim().is_empty() {
        route.route_type = "http".to_string();
    }
    Ok(route)
}

/// Target of a commit: image repository and tag.
pub fn commit_target(image: &str, tag: &str) -> EngineResult<()> {
    image_reference(image, "image")?;
    if tag.is_empty()
        || tag.len() > 128
        || !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(invalid(format!("tag '{tag}' is not a valid image tag")));
    }
    Ok(())
}
