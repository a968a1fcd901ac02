use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

pub const DELIMITER: char = '\u{1}';
pub const TOC_TITLE: &str = "<h2>Table of Contents</h2>";
pub const TABLE_CSS: &str = "horde-table";
pub const NEW_PAGE_CSS: &str = "newpage";

/// Markup dialect a wiki is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Dialect {
    Default,
    Cowiki,
    Tiki,
    BBCode,
    Creole,
    Mediawiki,
}

impl Dialect {
    pub const ALL: [Self; 6] = [
        Self::Default,
        Self::Cowiki,
        Self::Tiki,
        Self::BBCode,
        Self::Creole,
        Self::Mediawiki,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Cowiki => "Cowiki",
            Self::Tiki => "Tiki",
            Self::BBCode => "BBCode",
            Self::Creole => "Creole",
            Self::Mediawiki => "Mediawiki",
        }
    }

    /// Dialects that carry their own table-of-contents rule replacement.
    fn has_toc2(self) -> bool {
        matches!(self, Self::Default | Self::Cowiki | Self::Tiki)
    }

    fn base_rules(self) -> &'static [&'static str] {
        match self {
            Self::Default => &[
                "Prefilter", "Delimiter", "Code", "Function", "Html", "Raw", "Include", "Embed",
                "Anchor", "Heading", "Toc", "Horiz", "Break", "Blockquote", "List", "Deflist",
                "Table", "Image", "Phplookup", "Center", "Newline", "Paragraph", "Url",
                "Freelink", "Interwiki", "Wikilink", "Colortext", "Strong", "Bold", "Emphasis",
                "Italic", "Underline", "Tt", "Superscript", "Subscript", "Revise", "Tighten",
            ],
            Self::Cowiki => &[
                "Prefilter", "Delimiter", "Code", "Html", "Raw", "Include", "Embed", "Anchor",
                "Heading", "Toc", "Horiz", "Break", "Blockquote", "List", "Deflist", "Table",
                "Image", "Phplookup", "Center", "Newline", "Paragraph", "Url", "Freelink",
                "Interwiki", "Wikilink", "Colortext", "Strong", "Bold", "Emphasis", "Italic",
                "Tt", "Superscript", "Subscript", "Revise", "Tighten",
            ],
            Self::Tiki => &[
                "Prefilter", "Delimiter", "Code", "Plugin", "Function", "Html", "Raw",
                "Preformatted", "Include", "Embed", "Page", "Anchor", "Heading", "Toc",
                "Titlebar", "Horiz", "Break", "Blockquote", "List", "Deflist", "Table", "Box",
                "Image", "Phplookup", "Center", "Newline", "Paragraph", "Url", "Freelink",
                "Colortext", "Wikilink", "Strong", "Bold", "Emphasis", "Italic", "Underline",
                "Tt", "Superscript", "Subscript", "Revise", "Tighten",
            ],
            Self::BBCode => &[
                "Prefilter", "Delimiter", "Code", "Plugin", "Smiley", "Html", "Raw",
                "Preformatted", "Include", "Embed", "Page", "Anchor", "Heading", "Toc",
                "Titlebar", "Horiz", "Break", "Blockquote", "List", "Deflist", "Table", "Box",
                "Image", "Phplookup", "Center", "Newline", "Paragraph", "Url", "Freelink",
                "Colortext", "Font", "Strong", "Bold", "Emphasis", "Italic", "Underline", "Tt",
                "Superscript", "Subscript", "Revise", "Tighten",
            ],
            Self::Creole => &[
                "Prefilter", "Delimiter", "Preformatted", "Tt", "Trim", "Break", "Raw", "Box",
                "Footnote", "Table", "Newline", "Blockquote", "Wikilink", "Heading", "Center",
                "Horiz", "List", "Url", "Image", "Strong", "Emphasis", "Subscript",
                "Superscript", "Underline", "Tighten", "Paragraph",
            ],
            Self::Mediawiki => &[
                "Prefilter", "Delimiter", "Code", "Preformatted", "Plugin", "Html", "Raw",
                "Include", "Embed", "Anchor", "Heading", "Toc", "Horiz", "Break", "Blockquote",
                "List", "Deflist", "Table", "Image", "Phplookup", "Center", "Newline",
                "Paragraph", "Url", "Freelink", "Interwiki", "Wikilink", "Colortext", "Strong",
                "Bold", "Emphasis", "Italic", "Tt", "Superscript", "Subscript", "Revise",
                "Tighten",
            ],
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let wanted = value.trim();
        match Self::ALL
            .into_iter()
            .find(|dialect| dialect.as_str().eq_ignore_ascii_case(wanted))
        {
            Some(dialect) => Ok(dialect),
            None => bail!(
                "unknown markup format `{value}` (expected one of: {})",
                Self::ALL.map(Self::as_str).join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputFormat {
    Plain,
    Rst,
    Xhtml,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "Plain",
            Self::Rst => "Rst",
            Self::Xhtml => "Xhtml",
        }
    }

    /// Rst output links with absolute URLs.
    pub fn full_links(self) -> bool {
        matches!(self, Self::Rst)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "rst" => Ok(Self::Rst),
            "xhtml" | "html" => Ok(Self::Xhtml),
            other => bail!("unknown output format `{other}` (expected plain, rst or xhtml)"),
        }
    }
}

/// Link settings handed to the wiki link rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConf {
    pub pages: Vec<String>,
    pub view_url: String,
    /// Present only when the actor may create pages.
    pub new_url: Option<String>,
}

impl LinkConf {
    pub fn to_value(&self) -> Value {
        let new_url = match &self.new_url {
            Some(url) => Value::String(url.clone()),
            None => Value::Bool(false),
        };
        json!({
            "pages": self.pages,
            "view_url": self.view_url,
            "new_url": new_url,
            "new_text_pos": false,
            "css_new": NEW_PAGE_CSS,
            "ext_chars": true,
        })
    }
}

/// Configured markup processor: ordered rules plus per-rule settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Processor {
    pub dialect: Dialect,
    pub output: OutputFormat,
    pub delimiter: char,
    pub rules: Vec<String>,
    pub parse_conf: BTreeMap<String, Map<String, Value>>,
    pub render_conf: BTreeMap<String, BTreeMap<String, Map<String, Value>>>,
    pub format_conf: BTreeMap<String, Map<String, Value>>,
}

impl Processor {
    pub fn new(dialect: Dialect, output: OutputFormat) -> Self {
        let mut processor = Self {
            dialect,
            output,
            delimiter: DELIMITER,
            rules: dialect
                .base_rules()
                .iter()
                .map(|rule| normalize_rule(rule))
                .collect(),
            parse_conf: BTreeMap::new(),
            render_conf: BTreeMap::new(),
            format_conf: BTreeMap::new(),
        };
        processor.set_parse_conf(
            "Paragraph",
            "skip",
            json!([
                "blockquote",
                "code",
                "heading",
                "horiz",
                "deflist",
                "table",
                "list",
                "toc"
            ]),
        );
        processor
    }

    pub fn has_rule(&self, name: &str) -> bool {
        let name = normalize_rule(name);
        self.rules.iter().any(|rule| *rule == name)
    }

    /// Inserts `name` right after `target`. Returns false, leaving the rules
    /// alone, when `name` is already present or `target` is missing.
    pub fn insert_rule(&mut self, name: &str, target: &str) -> bool {
        let name = normalize_rule(name);
        let target = normalize_rule(target);
        if self.rules.contains(&name) {
            return false;
        }
        let Some(index) = self.rules.iter().position(|rule| *rule == target) else {
            return false;
        };
        self.rules.insert(index + 1, name);
        true
    }

    pub fn delete_rule(&mut self, name: &str) {
        let name = normalize_rule(name);
        self.rules.retain(|rule| *rule != name);
    }

    pub fn parse_conf(&self, rule: &str, key: &str) -> Option<&Value> {
        self.parse_conf.get(&normalize_rule(rule))?.get(key)
    }

    pub fn set_parse_conf(&mut self, rule: &str, key: &str, value: Value) {
        self.parse_conf
            .entry(normalize_rule(rule))
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Merges an object of settings into a rule's render config for `format`.
    pub fn set_render_conf(&mut self, format: OutputFormat, rule: &str, settings: Value) {
        let slot = self
            .render_conf
            .entry(format.as_str().to_string())
            .or_default()
            .entry(normalize_rule(rule))
            .or_default();
        if let Value::Object(settings) = settings {
            slot.extend(settings);
        }
    }

    pub fn render_conf(&self, format: OutputFormat, rule: &str) -> Option<&Map<String, Value>> {
        self.render_conf
            .get(format.as_str())?
            .get(&normalize_rule(rule))
    }

    pub fn set_format_conf(&mut self, format: OutputFormat, key: &str, value: Value) {
        self.format_conf
            .entry(format.as_str().to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn replace_rule(&mut self, replacement: &str, original: &str) {
        self.insert_rule(replacement, original);
        self.delete_rule(original);
    }

    fn append_paragraph_skip(&mut self, entry: &str) {
        let mut skip = match self.parse_conf("Paragraph", "skip") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        skip.push(Value::String(entry.to_string()));
        self.set_parse_conf("Paragraph", "skip", Value::Array(skip));
    }
}

/// Rule names compare as "first letter upper, rest lower".
pub fn normalize_rule(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Builds the processor for `dialect` rendering to `output`.
pub fn build_processor(dialect: Dialect, output: OutputFormat, links: &LinkConf) -> Processor {
    let mut proc = Processor::new(dialect, output);

    proc.replace_rule("Heading2", "Heading");
    proc.append_paragraph_skip("heading2");
    proc.set_parse_conf("Wikilink", "utf-8", Value::Bool(true));
    proc.set_parse_conf("Freelink", "utf-8", Value::Bool(true));

    if dialect.has_toc2() {
        proc.insert_rule("Toc2", "Toc");
    }
    proc.delete_rule("Toc");

    match output {
        OutputFormat::Plain => proc.replace_rule("Table2", "Table"),
        OutputFormat::Rst => {
            proc.replace_rule("Table2", "Table");
            proc.set_render_conf(OutputFormat::Rst, "Wikilink", links.to_value());
            if dialect == Dialect::Default {
                proc.insert_rule("Freelink2", "Freelink");
                proc.set_parse_conf("Freelink2", "utf-8", Value::Bool(true));
                proc.set_render_conf(OutputFormat::Rst, "Freelink2", links.to_value());
            }
            proc.delete_rule("Freelink");
        }
        OutputFormat::Xhtml => {
            if dialect != Dialect::Creole {
                proc.insert_rule("Code2", "Code");
            }
            proc.delete_rule("Code");

            if dialect == Dialect::BBCode {
                proc.insert_rule("Wickedblock", "Code2");
            } else {
                proc.insert_rule("Wikilink2", "Wikilink");
                proc.set_parse_conf("Wikilink2", "utf-8", Value::Bool(true));
                proc.insert_rule("Wickedblock", "Raw");
            }
            proc.delete_rule("Wikilink");

            if dialect.has_toc2() {
                proc.insert_rule("Freelink2", "Freelink");
                proc.set_parse_conf("Freelink2", "utf-8", Value::Bool(true));
            }
            proc.delete_rule("Freelink");

            proc.replace_rule("Image2", "Image");
            proc.insert_rule("RegistryLink", "Wickedblock");
            proc.insert_rule("Attribute", "RegistryLink");
            proc.delete_rule("Include");
            proc.delete_rule("Embed");

            proc.set_format_conf(OutputFormat::Xhtml, "charset", json!("UTF-8"));
            proc.set_format_conf(OutputFormat::Xhtml, "translate", json!("html_specialchars"));
            proc.set_render_conf(OutputFormat::Xhtml, "Wikilink2", links.to_value());
            proc.set_render_conf(OutputFormat::Xhtml, "Freelink2", links.to_value());
            proc.set_render_conf(OutputFormat::Xhtml, "Toc2", json!({ "title": TOC_TITLE }));
            proc.set_render_conf(OutputFormat::Xhtml, "Table", json!({ "css_table": TABLE_CSS }));
        }
    }

    debug!(
        dialect = %dialect,
        output = %output,
        rules = proc.rules.len(),
        "built markup processor"
    );
    proc
}

/// Turns page text into output through a configured processor.
pub trait MarkupEngine {
    fn render(&self, processor: &Processor, text: &str) -> Result<String>;
}

/// Engine that applies no markup rules. Xhtml output is HTML-escaped,
/// other formats get the source text back without delimiter characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEngine;

impl MarkupEngine for PassthroughEngine {
    fn render(&self, processor: &Processor, text: &str) -> Result<String> {
        let text: String = text.chars().filter(|ch| *ch != processor.delimiter).collect();
        Ok(match processor.output {
            OutputFormat::Xhtml => escape_html(&text),
            OutputFormat::Plain | OutputFormat::Rst => text,
        })
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}
