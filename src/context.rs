use std::env;

/// Session context injected into URL templates and event handlers:
/// where the gateway lives, which business the operator is scoped to,
/// and whether they may pick a different one.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub site_url: String,
    pub biz_id: String,
    pub can_select_biz: bool,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            site_url: "/".to_string(),
            biz_id: String::new(),
            can_select_biz: true,
        }
    }
}

impl RunContext {
    pub fn new(site_url: impl Into<String>, biz_id: impl Into<String>, can_select_biz: bool) -> Self {
        let mut site_url = site_url.into();
        if !site_url.ends_with('/') {
            site_url.push('/');
        }
        Self {
            site_url,
            biz_id: biz_id.into(),
            can_select_biz,
        }
    }

    /// Build a context from `FORMWIRE_*` environment variables.
    pub fn from_env() -> Self {
        let site_url = env::var("FORMWIRE_SITE_URL").unwrap_or_else(|_| "/".to_string());
        let biz_id = env::var("FORMWIRE_BIZ_ID").unwrap_or_default();
        let can_select_biz = !matches!(
            env::var("FORMWIRE_CAN_SELECT_BIZ").ok().as_deref(),
            Some("0") | Some("false") | Some("no")
        );
        Self::new(site_url, biz_id, can_select_biz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalizes_trailing_slash() {
        let ctx = RunContext::new("https://console.example.com", "2", true);
        assert_eq!(ctx.site_url, "https://console.example.com/");
        let ctx = RunContext::new("/", "", false);
        assert_eq!(ctx.site_url, "/");
    }
}
