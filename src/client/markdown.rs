use pulldown_cmark::{ html, Options, Parser };

/// Renders assistant Markdown to HTML. CommonMark plus strikethrough and
/// tables; no state, no side effects.
pub fn render_markdown(content: &str) -> String {
    let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES;
    let parser = Parser::new_ext(content, options);

    let mut out = String::with_capacity(content.len() + content.len() / 2);
    html::push_html(&mut out, parser);
    out
}
