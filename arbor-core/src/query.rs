//! Query-string micro-parser
//!
//! `&`-separated ASCII `key[=value]` tokens. Recognized keys route to typed
//! setters on the context; unrecognized keys are discarded without failing;
//! duplicate keys last-wins. A malformed value for a recognized key fails
//! the whole parse.

use tracing::debug;

use crate::request_context::{ParseError, RequestContext};
use crate::type_registry::TypeRegistry;

pub(crate) fn apply(
    mut ctx: RequestContext,
    query: &str,
    registry: &TypeRegistry,
) -> Result<RequestContext, ParseError> {
    for token in query.split('&').filter(|t| !t.is_empty()) {
        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (k, v),
            None => (token, ""),
        };
        ctx = match key {
            "view" => ctx.with_view_name(value, registry)?,
            "bootstrap" => ctx.with_bootstrap(parse_bool("bootstrap", value)?),
            "putReturnsNull" => ctx.with_put_returns_null(parse_bool("putReturnsNull", value)?),
            "removeReturnsNull" => {
                ctx.with_remove_returns_null(parse_bool("removeReturnsNull", value)?)
            }
            "basePath" => ctx.with_base_path(value),
            "viewType" => ctx.with_view_type(registry.resolve(value)?),
            "keyType" | "elementType" => ctx.with_key_type(registry.resolve(value)?),
            "valueType" => ctx.with_value_type(registry.resolve(value)?),
            "port" => ctx.with_port(parse_num("port", value)?),
            "host" => ctx.with_host(value),
            "timeout" => ctx.with_timeout_ms(parse_num("timeout", value)?),
            _ => {
                debug!(key, "discarding unrecognized query key");
                ctx
            }
        };
    }
    Ok(ctx)
}

/// A bare key (`bootstrap` with no `=`) reads as true.
fn parse_bool(key: &'static str, value: &str) -> Result<bool, ParseError> {
    match value {
        "" | "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ParseError::InvalidValue { key, value: other.to_string() }),
    }
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ParseError> {
    value
        .parse()
        .map_err(|_| ParseError::InvalidValue { key, value: value.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_registry::TypeKind;

    fn parse(uri: &str) -> Result<RequestContext, ParseError> {
        RequestContext::parse_with(uri, &TypeRegistry::with_builtins())
    }

    #[test]
    fn test_typed_keys() {
        let ctx = parse(
            "grid/prices?view=Map&keyType=String&valueType=int64&host=node7&port=9090&timeout=250",
        )
        .unwrap();
        assert_eq!(ctx.view_type().unwrap().name(), "MapView");
        assert_eq!(ctx.key_type().unwrap().name(), "String");
        assert_eq!(ctx.value_type().unwrap().name(), "Int64");
        assert_eq!(ctx.host(), "node7");
        assert_eq!(ctx.port(), 9090);
        assert_eq!(ctx.timeout_ms(), 250);
    }

    #[test]
    fn test_flags_and_base_path() {
        let ctx = parse("a?putReturnsNull=false&removeReturnsNull=true&basePath=/var/data")
            .unwrap();
        assert_eq!(ctx.put_returns_null(), Some(false));
        assert_eq!(ctx.remove_returns_null(), Some(true));
        assert_eq!(ctx.base_path().unwrap().to_str(), Some("/var/data"));
    }

    #[test]
    fn test_bare_bool_key_reads_true() {
        let ctx = parse("a?bootstrap").unwrap();
        assert_eq!(ctx.bootstrap(), Some(true));
    }

    #[test]
    fn test_element_type_aliases_key_type() {
        let ctx = parse("a?elementType=String").unwrap();
        assert_eq!(ctx.key_type().unwrap().name(), "String");
        assert_eq!(ctx.element_type().unwrap().name(), "String");
    }

    #[test]
    fn test_view_type_literal() {
        let ctx = parse("a?viewType=KeySet").unwrap();
        let view = ctx.view_type().unwrap();
        assert_eq!(view.name(), "KeySetView");
        assert_eq!(view.kind(), TypeKind::View);
    }

    #[test]
    fn test_unknown_keys_discarded() {
        let ctx = parse("a?nonsense=1&alsoUnknown&port=80").unwrap();
        assert_eq!(ctx.port(), 80);
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let ctx = parse("a?port=80&port=8080").unwrap();
        assert_eq!(ctx.port(), 8080);
    }

    #[test]
    fn test_unknown_type_literal_fails() {
        let err = parse("a?keyType=no.such.Type").unwrap_err();
        assert!(matches!(err, ParseError::UnknownType(name) if name == "no.such.Type"));
    }

    #[test]
    fn test_malformed_number_fails() {
        let err = parse("a?port=notaport").unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { key: "port", .. }));
    }

    #[test]
    fn test_malformed_bool_fails() {
        let err = parse("a?bootstrap=maybe").unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { key: "bootstrap", .. }));
    }
}
