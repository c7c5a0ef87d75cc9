//! Gateway route definitions parsed into an immutable routing table.
use std::collections::HashSet;

use http::Method;

use crate::{
    config::RouteDefinition,
    core::{CoreError, CoreResult},
};

const LB_SCHEME: &str = "lb://";

fn default_methods() -> Vec<Method> {
    vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
    ]
}

/// A parsed route: where requests matching `path_pattern` go and how their
/// path is rewritten on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub id: String,
    /// Service name without the `lb://` scheme.
    pub target_service_name: String,
    /// Pattern as configured, e.g. `/orders/**`.
    pub path_pattern: String,
    pub strip_prefix_count: usize,
    pub methods: Vec<Method>,
}

impl Route {
    pub fn parse(definition: &RouteDefinition) -> CoreResult<Self> {
        let invalid = |message: String| CoreError::InvalidRoute {
            route_id: definition.id.clone(),
            message,
        };

        if definition.id.trim().is_empty() {
            return Err(invalid("route id must not be empty".to_string()));
        }

        let target_service_name = definition
            .uri
            .strip_prefix(LB_SCHEME)
            .unwrap_or(&definition.uri)
            .trim_end_matches('/')
            .to_string();
        if target_service_name.is_empty() || target_service_name.contains('/') {
            return Err(invalid(format!(
                "uri '{}' must name a service as lb://<service>",
                definition.uri
            )));
        }

        let mut path_pattern = None;
        let mut methods = None;
        for predicate in &definition.predicates {
            let (name, value) = predicate
                .split_once('=')
                .ok_or_else(|| invalid(format!("malformed predicate '{predicate}'")))?;
            match name.trim() {
                "Path" => {
                    let value = value.trim();
                    if !value.starts_with('/') {
                        return Err(invalid(format!("path '{value}' must start with '/'")));
                    }
                    if value.contains(['{', '}'])
                        || value
                            .trim_end_matches("/**")
                            .trim_end_matches("/*")
                            .contains('*')
                    {
                        return Err(invalid(format!(
                            "path '{value}' may only use a trailing '/**' or '/*' wildcard"
                        )));
                    }
                    path_pattern = Some(value.to_string());
                }
                "Method" => {
                    let parsed = value
                        .split(',')
                        .map(|m| {
                            Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                                .map_err(|_| invalid(format!("unknown method '{}'", m.trim())))
                        })
                        .collect::<CoreResult<Vec<_>>>()?;
                    methods = Some(parsed);
                }
                other => return Err(invalid(format!("unsupported predicate '{other}'"))),
            }
        }
        let path_pattern =
            path_pattern.ok_or_else(|| invalid("a Path= predicate is required".to_string()))?;

        let mut strip_prefix_count = 0;
        for filter in &definition.filters {
            let (name, value) = filter
                .split_once('=')
                .ok_or_else(|| invalid(format!("malformed filter '{filter}'")))?;
            match name.trim() {
                "StripPrefix" => {
                    strip_prefix_count = value
                        .trim()
                        .parse()
                        .map_err(|_| invalid(format!("StripPrefix '{value}' is not a count")))?;
                }
                other => return Err(invalid(format!("unsupported filter '{other}'"))),
            }
        }

        Ok(Self {
            id: definition.id.clone(),
            target_service_name,
            path_pattern,
            strip_prefix_count,
            methods: methods.unwrap_or_else(default_methods),
        })
    }

    /// The pattern in axum's syntax: a trailing `**` or `*` segment becomes a
    /// `{*rest}` catch-all.
    pub fn axum_path(&self) -> String {
        let pattern = self.path_pattern.trim_end_matches('/');
        match pattern
            .strip_suffix("/**")
            .or_else(|| pattern.strip_suffix("/*"))
        {
            Some(base) => format!("{base}/{{*rest}}"),
            None if pattern.is_empty() => "/".to_string(),
            None => pattern.to_string(),
        }
    }

    /// Every axum path this route answers on. axum's catch-all needs at least
    /// one character, so `/orders/**` also registers `/orders` and `/orders/`.
    pub fn axum_paths(&self) -> Vec<String> {
        let path = self.axum_path();
        match path.strip_suffix("/{*rest}") {
            Some("") => vec![path.clone(), "/".to_string()],
            Some(base) => vec![path.clone(), base.to_string(), format!("{base}/")],
            None => vec![path],
        }
    }

    /// Drop the first `strip_prefix_count` segments of `path`.
    pub fn strip_prefix(&self, path: &str) -> String {
        let rest: Vec<&str> = path
            .split('/')
            .skip(1)
            .skip(self.strip_prefix_count)
            .collect();
        format!("/{}", rest.join("/"))
    }
}

/// All routes of a gateway, validated as a whole.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn build(definitions: &[RouteDefinition]) -> CoreResult<Self> {
        let mut ids = HashSet::new();
        let mut paths = HashSet::new();
        let mut routes = Vec::with_capacity(definitions.len());

        for definition in definitions {
            let route = Route::parse(definition)?;
            if !ids.insert(route.id.clone()) {
                return Err(CoreError::InvalidRoute {
                    route_id: route.id,
                    message: "duplicate route id".to_string(),
                });
            }
            for path in route.axum_paths() {
                if !paths.insert(path) {
                    return Err(CoreError::InvalidRoute {
                        message: format!("path '{}' is already routed", route.path_pattern),
                        route_id: route.id,
                    });
                }
            }
            tracing::debug!(
                route = %route.id,
                path = %route.path_pattern,
                service = %route.target_service_name,
                "Parsed route"
            );
            routes.push(route);
        }

        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
