use std::env;
use std::sync::OnceLock;

static BACKEND_OVERRIDE: OnceLock<Option<String>> = OnceLock::new();

/// Backend name forced via `GRADRS_BACKEND`, consulted by `Engine::ready`.
pub(crate) fn backend_override() -> Option<&'static str> {
    BACKEND_OVERRIDE
        .get_or_init(|| match env::var("GRADRS_BACKEND") {
            Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
            _ => None,
        })
        .as_deref()
}
