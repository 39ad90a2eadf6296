// Supported languages and the route guard that keeps unsupported codes away from handlers.

use actix_web::dev::{Path, ResourceDef, Url};
use actix_web::guard::{Guard, GuardContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Swedish,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::English, Language::Swedish];

    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Swedish => "sv",
        }
    }

    /// Case-sensitive lookup: `"en"` is supported, `"EN"` is not.
    pub fn from_code(code: &str) -> Option<Language> {
        Self::ALL.into_iter().find(|lang| lang.code() == code)
    }
}

pub fn is_supported(code: &str) -> bool {
    Language::from_code(code).is_some()
}

/**
 * LanguageGuard
 * 从请求路径中取出 `{language}` 段并校验；不通过时路由视为未匹配（404）。
 * 与路由一样按解码后的路径匹配，`/api/%65n/...` 等同于 `/api/en/...`。
 */
pub struct LanguageGuard {
    route: ResourceDef,
}

impl LanguageGuard {
    pub fn new(pattern: &str) -> Self {
        Self {
            route: ResourceDef::prefix(pattern),
        }
    }
}

impl Guard for LanguageGuard {
    fn check(&self, ctx: &GuardContext<'_>) -> bool {
        let mut path = Path::new(Url::new(ctx.head().uri.clone()));
        if !self.route.capture_match_info(&mut path) {
            return false;
        }

        let supported = path
            .get("language")
            .and_then(|raw| urlencoding::decode(raw).ok())
            .is_some_and(|code| is_supported(&code));
        if !supported {
            log::debug!(
                "Rejected unsupported language segment in {}",
                ctx.head().uri.path()
            );
        }
        supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_supported_codes() {
        assert!(is_supported("en"));
        assert!(is_supported("sv"));
        assert_eq!(Language::from_code("sv"), Some(Language::Swedish));
    }

    #[test]
    fn test_unsupported_codes() {
        assert!(!is_supported("EN"));
        assert!(!is_supported("Sv"));
        assert!(!is_supported("de"));
        assert!(!is_supported(""));
        assert!(!is_supported("en-US"));
    }

    #[test]
    fn test_guard_checks_language_segment() {
        let guard = LanguageGuard::new("/api/{language}/translationitems");

        let req = TestRequest::get()
            .uri("/api/sv/translationitems/greeting")
            .to_srv_request();
        assert!(guard.check(&req.guard_ctx()));

        let req = TestRequest::get()
            .uri("/api/fr/translationitems")
            .to_srv_request();
        assert!(!guard.check(&req.guard_ctx()));

        let req = TestRequest::get()
            .uri("/api/%65n/translationitems")
            .to_srv_request();
        assert!(guard.check(&req.guard_ctx()));

        let req = TestRequest::get()
            .uri("/api/%45N/translationitems")
            .to_srv_request();
        assert!(!guard.check(&req.guard_ctx()));

        let req = TestRequest::get().uri("/api/health").to_srv_request();
        assert!(!guard.check(&req.guard_ctx()));
    }
}
