//! Reply template rendering

use std::cell::OnceCell;
use std::sync::Arc;

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::ports::{Clock, SystemClock};

pub const USER_NAME_TOKEN: &str = "{userName}";
pub const LINK_PAGE_URL_TOKEN: &str = "{linkPageUrl}";
pub const DATE_TOKEN: &str = "{date}";
pub const TIME_TOKEN: &str = "{time}";

/// Every placeholder the renderer knows how to fill
pub const KNOWN_TOKENS: [&str; 4] = [USER_NAME_TOKEN, LINK_PAGE_URL_TOKEN, DATE_TOKEN, TIME_TOKEN];

/// Substituted for `{userName}` when the sender is unknown
pub const DEFAULT_USER_NAME: &str = "@user";

/// Substituted for `{linkPageUrl}` when no link page is configured
pub const DEFAULT_LINK_PAGE_URL: &str = "https://linkinbio.example/your-page";

/// Values for the template placeholders; `None` or blank falls back to a default
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateBindings {
    pub user_name: Option<String>,
    pub link_page_url: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
}

/// Renders reply templates, using a clock for the date/time defaults
#[derive(Clone)]
pub struct TemplateRenderer {
    clock: Arc<dyn Clock>,
    offset: UtcOffset,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), UtcOffset::UTC)
    }
}

impl TemplateRenderer {
    pub fn new(clock: Arc<dyn Clock>, offset: UtcOffset) -> Self {
        Self { clock, offset }
    }

    /// Replace every occurrence of the known tokens. Unknown tokens stay verbatim.
    pub fn render(&self, template: &str, bindings: &TemplateBindings) -> String {
        // Read the clock at most once, and only when a date or time is missing
        let clock_reading = OnceCell::new();
        let now = || *clock_reading.get_or_init(|| self.clock.now().to_offset(self.offset));

        let user_name = non_blank(&bindings.user_name).unwrap_or(DEFAULT_USER_NAME);
        let link_page_url = non_blank(&bindings.link_page_url).unwrap_or(DEFAULT_LINK_PAGE_URL);
        let date = non_blank(&bindings.date)
            .map(str::to_string)
            .unwrap_or_else(|| format_date(now()));
        let time = non_blank(&bindings.time)
            .map(str::to_string)
            .unwrap_or_else(|| format_time(now()));

        template
            .replace(USER_NAME_TOKEN, user_name)
            .replace(LINK_PAGE_URL_TOKEN, link_page_url)
            .replace(DATE_TOKEN, &date)
            .replace(TIME_TOKEN, &time)
    }

    /// Bindings with date and time taken from this renderer's clock
    pub fn bindings_at_now(
        &self,
        user_name: Option<String>,
        link_page_url: Option<String>,
    ) -> TemplateBindings {
        let now = self.clock.now().to_offset(self.offset);
        TemplateBindings {
            user_name,
            link_page_url,
            date: Some(format_date(now)),
            time: Some(format_time(now)),
        }
    }
}

/// Render with the system clock in UTC
pub fn render(template: &str, bindings: &TemplateBindings) -> String {
    TemplateRenderer::default().render(template, bindings)
}

/// Known tokens still present in `text`
pub fn unresolved_tokens(text: &str) -> Vec<&'static str> {
    KNOWN_TOKENS
        .into_iter()
        .filter(|token| text.contains(token))
        .collect()
}

/// `5/1/2024`
pub fn format_date(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[month padding:none]/[day padding:none]/[year]"
    ))
    .unwrap_or_default()
}

/// `2:05:09 PM`
pub fn format_time(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[hour repr:12 padding:none]:[minute]:[second] [period]"
    ))
    .unwrap_or_default()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    struct FixedClock(OffsetDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> OffsetDateTime {
            self.0
        }
    }

    fn fixed_renderer() -> TemplateRenderer {
        TemplateRenderer::new(
            Arc::new(FixedClock(datetime!(2024-05-01 14:05:09 UTC))),
            UtcOffset::UTC,
        )
    }

    #[test]
    fn test_render_substitutes_bound_values() {
        let bindings = TemplateBindings {
            user_name: Some("Jordan".to_string()),
            link_page_url: Some("https://x.io/j".to_string()),
            ..Default::default()
        };
        assert_eq!(
            render("Hi {userName}, visit {linkPageUrl}", &bindings),
            "Hi Jordan, visit https://x.io/j"
        );
    }

    #[test]
    fn test_render_applies_user_default() {
        assert_eq!(
            render("Hello {userName}", &TemplateBindings::default()),
            "Hello @user"
        );
    }

    #[test]
    fn test_render_applies_link_default() {
        let rendered = render("See {linkPageUrl}", &TemplateBindings::default());
        assert_eq!(rendered, format!("See {}", DEFAULT_LINK_PAGE_URL));
    }

    #[test]
    fn test_render_defaults_date_and_time_from_clock() {
        let rendered = fixed_renderer().render("{date} at {time}", &TemplateBindings::default());
        assert_eq!(rendered, "5/1/2024 at 2:05:09 PM");
    }

    #[test]
    fn test_render_skips_clock_when_date_and_time_are_bound() {
        struct CountingClock(AtomicUsize);

        impl Clock for CountingClock {
            fn now(&self) -> OffsetDateTime {
                self.0.fetch_add(1, Ordering::SeqCst);
                datetime!(2024-05-01 14:05:09 UTC)
            }
        }

        let clock = Arc::new(CountingClock(AtomicUsize::new(0)));
        let renderer = TemplateRenderer::new(clock.clone(), UtcOffset::UTC);
        let bindings = TemplateBindings {
            date: Some("6/2/2024".to_string()),
            time: Some("9:00:00 AM".to_string()),
            ..Default::default()
        };

        let rendered = renderer.render("{date} {time}", &bindings);
        assert_eq!(rendered, "6/2/2024 9:00:00 AM");
        assert_eq!(clock.0.load(Ordering::SeqCst), 0);

        renderer.render("{date} {time}", &TemplateBindings::default());
        assert_eq!(clock.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_render_respects_offset() {
        let renderer = TemplateRenderer::new(
            Arc::new(FixedClock(datetime!(2024-05-01 01:30:00 UTC))),
            time::macros::offset!(-3),
        );
        let rendered = renderer.render("{date} {time}", &TemplateBindings::default());
        assert_eq!(rendered, "4/30/2024 10:30:00 PM");
    }

    #[test]
    fn test_render_replaces_every_occurrence() {
        let bindings = TemplateBindings {
            user_name: Some("Sam".to_string()),
            ..Default::default()
        };
        assert_eq!(render("{userName}! {userName}!", &bindings), "Sam! Sam!");
    }

    #[test]
    fn test_render_leaves_unknown_tokens() {
        let rendered = render("Hi {firstName} <b>{userName}</b>", &TemplateBindings::default());
        assert_eq!(rendered, "Hi {firstName} <b>@user</b>");
    }

    #[test]
    fn test_blank_binding_falls_back_to_default() {
        let bindings = TemplateBindings {
            user_name: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(render("Hey {userName}", &bindings), "Hey @user");
    }

    #[test]
    fn test_render_is_idempotent_with_fixed_inputs() {
        let renderer = fixed_renderer();
        let bindings = TemplateBindings::default();
        let template = "{userName} {linkPageUrl} {date} {time}";
        assert_eq!(
            renderer.render(template, &bindings),
            renderer.render(template, &bindings)
        );
    }

    #[test]
    fn test_unresolved_tokens() {
        assert_eq!(unresolved_tokens("Hi {userName} {date}"), vec![USER_NAME_TOKEN, DATE_TOKEN]);
        assert!(unresolved_tokens("Hi Jordan").is_empty());
    }
}
