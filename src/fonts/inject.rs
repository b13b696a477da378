//! Font injection: turn a family's remote stylesheet into a self-contained
//! `<style>` block with every face inlined as a data URI.

use super::cache::FontCache;
use crate::engine::Surface;
use crate::Result;
use std::fmt::Write as _;
use std::sync::Arc;

/// Fallback stack appended after the requested family on `body`
pub const GENERIC_FALLBACKS: &str = "system-ui, -apple-system, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif";

/// One usable `@font-face` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontFace {
    pub weight: u16,
    pub url: String,
    /// Declared `format(...)`, if any
    pub format: Option<String>,
    pub unicode_range: Option<String>,
}

impl FontFace {
    /// Format keyword for the generated `src` descriptor
    pub fn format_keyword(&self) -> &str {
        if let Some(f) = self.format.as_deref() {
            return f;
        }
        match extension(&self.url).as_deref() {
            Some("woff") => "woff",
            Some("ttf") => "truetype",
            Some("otf") => "opentype",
            _ => "woff2",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self.format_keyword() {
            "woff" => "font/woff",
            "truetype" => "font/ttf",
            "opentype" => "font/otf",
            _ => "font/woff2",
        }
    }
}

/// Extract `(weight, url)` faces from stylesheet text.
///
/// Blocks without a numeric (or `normal`/`bold`) weight, or whose `src` lists
/// only legacy formats, are skipped.
pub fn parse_font_faces(css: &str) -> Vec<FontFace> {
    let mut faces = Vec::new();
    let mut rest = css;
    while let Some(at) = rest.find("@font-face") {
        rest = &rest[at + "@font-face".len()..];
        let Some(open) = rest.find('{') else { break };
        let Some(close) = rest[open..].find('}') else { break };
        let block = &rest[open + 1..open + close];
        rest = &rest[open + close + 1..];

        let Some(weight) = declaration(block, "font-weight").and_then(parse_weight) else {
            continue;
        };
        let Some((url, format)) = declaration(block, "src").and_then(first_modern_source) else {
            continue;
        };
        faces.push(FontFace {
            weight,
            url,
            format,
            unicode_range: declaration(block, "unicode-range").map(|v| v.to_string()),
        });
    }
    faces
}

/// Value of `name: value;` inside a declaration block
fn declaration<'a>(block: &'a str, name: &str) -> Option<&'a str> {
    let mut search = block;
    while let Some(pos) = search.find(name) {
        let before_ok = search[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| c.is_whitespace() || c == ';' || c == '{');
        let after = &search[pos + name.len()..];
        let trimmed = after.trim_start();
        if before_ok && trimmed.starts_with(':') {
            let value = &trimmed[1..];
            let end = value.find(';').unwrap_or(value.len());
            return Some(value[..end].trim());
        }
        search = after;
    }
    None
}

fn parse_weight(value: &str) -> Option<u16> {
    let first = value.split_whitespace().next()?;
    match first {
        "normal" => Some(400),
        "bold" => Some(700),
        n => n.parse::<u16>().ok(),
    }
}

/// First `url(...)` in a `src` list that is not EOT or SVG
fn first_modern_source(src: &str) -> Option<(String, Option<String>)> {
    for entry in src.split(',') {
        let Some(start) = entry.find("url(") else { continue };
        let after = &entry[start + 4..];
        let Some(end) = after.find(')') else { continue };
        let url = after[..end].trim().trim_matches(|c| c == '"' || c == '\'').to_string();
        let format = entry[start + 4 + end..].find("format(").map(|f| {
            let tail = &entry[start + 4 + end + f + 7..];
            let stop = tail.find(')').unwrap_or(tail.len());
            tail[..stop].trim().trim_matches(|c| c == '"' || c == '\'').to_string()
        });

        let legacy_format = matches!(format.as_deref(), Some("embedded-opentype") | Some("svg"));
        let legacy_ext = matches!(extension(&url).as_deref(), Some("eot") | Some("svg"));
        if url.is_empty() || url.starts_with("data:") || legacy_format || legacy_ext {
            continue;
        }
        return Some((url, format));
    }
    None
}

fn extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Quote a family name as a CSS string
fn css_quote(family: &str) -> String {
    format!("'{}'", family.trim().replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Builds and injects embedded font styles
#[derive(Clone)]
pub struct FontInjector {
    cache: Arc<FontCache>,
}

impl FontInjector {
    pub fn new(cache: Arc<FontCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<FontCache> {
        &self.cache
    }

    /// The complete style block for `family`.
    ///
    /// A family without usable faces yields only the `body` rule.
    pub fn build_style(&self, family: &str) -> Result<String> {
        let css = self.cache.stylesheet(family)?;
        let quoted = css_quote(family);
        let mut style = String::new();

        for face in parse_font_faces(&css) {
            let data = self.cache.binary_base64(&face.url)?;
            let _ = writeln!(style, "@font-face {{");
            let _ = writeln!(style, "  font-family: {};", quoted);
            let _ = writeln!(style, "  font-style: normal;");
            let _ = writeln!(style, "  font-weight: {};", face.weight);
            let _ = writeln!(style, "  font-display: swap;");
            let _ = writeln!(
                style,
                "  src: url(data:{};base64,{}) format('{}');",
                face.mime_type(),
                data,
                face.format_keyword()
            );
            if let Some(range) = &face.unicode_range {
                let _ = writeln!(style, "  unicode-range: {};", range);
            }
            let _ = writeln!(style, "}}");
        }

        let _ = writeln!(style, "body {{ font-family: {}, {}; }}", quoted, GENERIC_FALLBACKS);
        Ok(style)
    }

    /// Inject a built style and block until the surface reports fonts ready.
    pub fn apply(&self, surface: &mut dyn Surface, style: &str) -> Result<()> {
        surface.inject_style(style)?;
        surface.wait_for_fonts()
    }

    /// [`build_style`](Self::build_style) followed by [`apply`](Self::apply)
    pub fn embed(&self, surface: &mut dyn Surface, family: &str) -> Result<()> {
        let style = self.build_style(family)?;
        self.apply(surface, &style)
    }

    /// Fetch a family's stylesheet and every face it references.
    /// Returns the number of faces now cached.
    pub fn warm(&self, family: &str) -> Result<usize> {
        let css = self.cache.stylesheet(family)?;
        let faces = parse_font_faces(&css);
        for face in &faces {
            self.cache.binary_base64(&face.url)?;
        }
        Ok(faces.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::fetch::StaticFontFetcher;
    use crate::FontConfig;

    const GOOGLE_CSS: &str = r#"
/* latin-ext */
@font-face {
  font-family: 'Inter';
  font-style: normal;
  font-weight: 400;
  font-display: swap;
  src: url(https://fonts.gstatic.com/s/inter/v13/latin-ext-400.woff2) format('woff2');
  unicode-range: U+0100-02AF, U+0304;
}
/* latin */
@font-face {
  font-family: 'Inter';
  font-style: normal;
  font-weight: 700;
  font-display: swap;
  src: url(https://fonts.gstatic.com/s/inter/v13/latin-700.woff2) format('woff2');
}
"#;

    #[test]
    fn parses_weights_urls_and_ranges() {
        let faces = parse_font_faces(GOOGLE_CSS);
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].weight, 400);
        assert_eq!(faces[0].url, "https://fonts.gstatic.com/s/inter/v13/latin-ext-400.woff2");
        assert_eq!(faces[0].format.as_deref(), Some("woff2"));
        assert_eq!(faces[0].unicode_range.as_deref(), Some("U+0100-02AF, U+0304"));
        assert_eq!(faces[1].weight, 700);
        assert_eq!(faces[1].unicode_range, None);
    }

    #[test]
    fn skips_legacy_sources_and_incomplete_blocks() {
        let css = r#"
@font-face { font-family: A; font-weight: bold;
  src: url('a.eot?#iefix') format('embedded-opentype'), url("a.woff") format("woff"), url(a.ttf); }
@font-face { font-family: B; src: url(b.woff2); }
@font-face { font-family: C; font-weight: 300; src: url(c.svg#C) format('svg'); }
@font-face { font-family: D; font-weight: normal; src: url(/fonts/d.ttf); }
"#;
        let faces = parse_font_faces(css);
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].weight, 700);
        assert_eq!(faces[0].url, "a.woff");
        assert_eq!(faces[0].mime_type(), "font/woff");
        assert_eq!(faces[1].weight, 400);
        assert_eq!(faces[1].format_keyword(), "truetype");
    }

    #[test]
    fn weight_ranges_take_the_lower_bound() {
        let css = "@font-face { font-weight: 100 900; src: url(v.woff2) format('woff2'); }";
        assert_eq!(parse_font_faces(css)[0].weight, 100);
    }

    #[test]
    fn builds_inline_style_from_cache() {
        let fetcher = Arc::new(StaticFontFetcher::new());
        let cache = Arc::new(FontCache::new(fetcher.clone(), FontConfig::default()));
        cache.seed_stylesheet(
            "Inter",
            "@font-face { font-weight: 400; src: url(https://f/inter.woff2) format('woff2'); }",
        );
        cache.seed_binary("https://f/inter.woff2", b"font");

        let style = FontInjector::new(cache).build_style("Inter").unwrap();
        assert!(style.contains("font-family: 'Inter';"));
        assert!(style.contains("font-weight: 400;"));
        assert!(style.contains("font-display: swap;"));
        assert!(style.contains("src: url(data:font/woff2;base64,Zm9udA==) format('woff2');"));
        assert!(style.contains("body { font-family: 'Inter', system-ui"));
        assert_eq!(fetcher.fetch_count(), 0);
    }

    #[test]
    fn family_without_faces_gets_only_body_rule() {
        let fetcher = Arc::new(StaticFontFetcher::new());
        let cache = Arc::new(FontCache::new(fetcher, FontConfig::default()));
        cache.seed_stylesheet("Georgia", "/* system font */");
        let style = FontInjector::new(cache).build_style("Georgia").unwrap();
        assert!(!style.contains("@font-face"));
        assert_eq!(style.lines().count(), 1);
        assert!(style.starts_with("body { font-family: 'Georgia',"));
    }

    #[test]
    fn quotes_family_names() {
        assert_eq!(css_quote("DM Sans"), "'DM Sans'");
        assert_eq!(css_quote("O'Font"), "'O\\'Font'");
    }
}
