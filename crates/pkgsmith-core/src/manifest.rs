//! Lossless document model for the block-structured `.acl` manifest format.
//!
//! A document is an ordered sequence of fields, nested blocks, and stray
//! tokens. Comments and whitespace are carried as leading trivia on the next
//! token, so serialization reconstructs the input byte-for-byte. Field upsert
//! is "find-or-append a node", never text surgery: an upsert with an
//! unchanged value is byte-identical to the input.
//!
//! The grammar is line-agnostic: `Manifest { string name = "foo"; }` on a
//! single line parses the same as the pretty-printed form. Braces are counted
//! textually; string literals cannot span lines.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

/// Errors from reading or writing a manifest file.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Filesystem failure while loading or saving the document.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokKind {
    Ident,
    Str,
    Punct,
}

/// One lexeme plus the trivia (whitespace, comments) that precedes it.
#[derive(Debug, Clone)]
struct Token {
    lead: String,
    text: String,
    kind: TokKind,
}

impl Token {
    fn new(lead: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            lead: lead.into(),
            text: text.into(),
            kind: TokKind::Ident,
        }
    }
}

#[derive(Debug, Clone)]
enum Item {
    Field(Field),
    Block(Block),
    Stray(Token),
}

/// A `[type] key = value;` declaration.
#[derive(Debug, Clone)]
struct Field {
    ty: Option<Token>,
    key: Token,
    eq: Token,
    value: Vec<Token>,
    semi: Option<Token>,
}

impl Field {
    /// Rewrite this field in place, canonicalizing the type and key while
    /// preserving the original indentation.
    fn rewrite(&mut self, ty: &str, key: &str, value: &FieldValue) {
        match &mut self.ty {
            Some(t) => t.text = ty.to_string(),
            None => {
                let lead = std::mem::take(&mut self.key.lead);
                self.ty = Some(Token::new(lead, ty));
                self.key.lead = " ".to_string();
            }
        }
        self.key.text = key.to_string();
        self.value = vec![Token::new(" ", value.render())];
        if self.semi.is_none() {
            self.semi = Some(Token::new("", ";"));
        }
    }

    /// Raw value text; a single quoted string is returned unquoted.
    fn value_text(&self) -> String {
        if let [tok] = self.value.as_slice() {
            if tok.kind == TokKind::Str {
                return tok
                    .text
                    .trim_start_matches('"')
                    .trim_end_matches('"')
                    .to_string();
            }
        }
        let mut out = String::new();
        for (i, tok) in self.value.iter().enumerate() {
            if i > 0 {
                out.push_str(&tok.lead);
            }
            out.push_str(&tok.text);
        }
        out
    }
}

/// A `Name [ "label" ] { ... }` block.
#[derive(Debug, Clone)]
pub struct Block {
    name: Token,
    label: Option<Token>,
    open: Token,
    items: Vec<Item>,
    close: Option<Token>,
    depth: usize,
}

impl Block {
    /// Create an empty block for document generation. `depth` is the nesting
    /// level (0 for a top-level block) and controls the indentation of pushed
    /// children.
    pub fn new(name: &str, label: Option<&str>, depth: usize) -> Self {
        let ind = indent(depth);
        Self {
            name: Token::new(format!("\n{ind}"), name),
            label: label.map(|l| Token {
                lead: " ".to_string(),
                text: format!("\"{l}\""),
                kind: TokKind::Str,
            }),
            open: Token::new(" ", "{"),
            items: Vec::new(),
            close: Some(Token::new(format!("\n{ind}"), "}")),
            depth,
        }
    }

    /// Append a typed field declaration.
    pub fn push_field(&mut self, ty: &str, key: &str, value: &FieldValue) {
        let ind = indent(self.depth + 1);
        self.items.push(Item::Field(Field {
            ty: Some(Token::new(format!("\n{ind}"), ty)),
            key: Token::new(" ", key),
            eq: Token::new(" ", "="),
            value: vec![Token {
                lead: " ".to_string(),
                text: value.render(),
                kind: TokKind::Str,
            }],
            semi: Some(Token::new("", ";")),
        }));
    }

    /// Append a comment line, e.g. `/* foo package */`.
    pub fn push_comment(&mut self, text: &str) {
        let ind = indent(self.depth + 1);
        self.items
            .push(Item::Stray(Token::new(format!("\n{ind}"), text)));
    }

    /// Append a blank line.
    pub fn push_blank(&mut self) {
        self.items.push(Item::Stray(Token::new("\n", "")));
    }

    /// Append a nested block.
    pub fn push_block(&mut self, block: Block) {
        self.items.push(Item::Block(block));
    }
}

/// A rendered field value.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// A quoted string.
    Str(String),
    /// A bare `true` / `false`.
    Bool(bool),
    /// A bare integer.
    Int(i64),
    /// A `{ "a", "b" }` string list.
    List(Vec<String>),
}

impl FieldValue {
    /// Convenience constructor for string values.
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    fn render(&self) -> String {
        match self {
            Self::Str(s) => format!("\"{s}\""),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::List(items) => {
                let inner = items
                    .iter()
                    .map(|s| format!("\"{s}\""))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{ {inner} }}")
            }
        }
    }
}

/// An ordered, lossless `.acl` document.
#[derive(Debug, Clone, Default)]
pub struct Document {
    items: Vec<Item>,
    trailing: String,
}

impl Document {
    /// Parse a document. Parsing is total: anything that is not a field or a
    /// block is preserved as stray content and round-trips unchanged.
    pub fn parse(text: &str) -> Self {
        let (tokens, trailing) = lex(text);
        let mut parser = Parser { tokens, pos: 0 };
        let (items, _) = parser.parse_items(false);
        Self { items, trailing }
    }

    /// Read and parse a document from disk.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Serialize the document to disk.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        fs::write(path, self.to_string())?;
        Ok(())
    }

    /// Build a document from a single generated top-level block, with a
    /// trailing newline.
    pub fn from_root(mut root: Block) -> Self {
        root.name.lead.clear();
        Self {
            items: vec![Item::Block(root)],
            trailing: "\n".to_string(),
        }
    }

    /// Insert or update a field.
    ///
    /// The first field (in document order, at any depth) whose key is `key`
    /// or one of `aliases` is rewritten in place with the canonical type and
    /// key; later equivalents are dropped so at most one remains. If no match
    /// exists, an indented field is appended before the closing brace of the
    /// first top-level block, or at end of file when the document has no
    /// block at all.
    pub fn upsert_field(&mut self, ty: &str, key: &str, aliases: &[&str], value: &FieldValue) {
        let matches = |k: &str| k == key || aliases.contains(&k);

        if let Some(field) = find_field_mut(&mut self.items, &matches) {
            field.rewrite(ty, key, value);
            let mut seen = false;
            drop_extra_fields(&mut self.items, &matches, &mut seen);
            return;
        }

        for item in &mut self.items {
            if let Item::Block(block) = item {
                block.items.push(Item::Field(Field {
                    ty: Some(Token::new("\n    ", ty)),
                    key: Token::new(" ", key),
                    eq: Token::new(" ", "="),
                    value: vec![Token::new(" ", value.render())],
                    semi: Some(Token::new("", ";")),
                }));
                if let Some(close) = &mut block.close {
                    if !close.lead.contains('\n') {
                        close.lead = "\n".to_string();
                    }
                }
                return;
            }
        }

        // No block anywhere: append the field at end of file.
        let mut lead = std::mem::take(&mut self.trailing);
        if !lead.ends_with('\n') {
            lead.push('\n');
        }
        lead.push_str("    ");
        self.items.push(Item::Field(Field {
            ty: Some(Token::new(lead, ty)),
            key: Token::new(" ", key),
            eq: Token::new(" ", "="),
            value: vec![Token::new(" ", value.render())],
            semi: Some(Token::new("", ";")),
        }));
        self.trailing = "\n".to_string();
    }

    /// Look up the first field with the given key, at any depth. Quoted
    /// string values are returned unquoted.
    pub fn get_field(&self, key: &str) -> Option<String> {
        find_field(&self.items, key).map(Field::value_text)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_items(f, &self.items)?;
        f.write_str(&self.trailing)
    }
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn write_token(f: &mut fmt::Formatter<'_>, tok: &Token) -> fmt::Result {
    f.write_str(&tok.lead)?;
    f.write_str(&tok.text)
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Item]) -> fmt::Result {
    for item in items {
        match item {
            Item::Stray(tok) => write_token(f, tok)?,
            Item::Field(field) => {
                if let Some(ty) = &field.ty {
                    write_token(f, ty)?;
                }
                write_token(f, &field.key)?;
                write_token(f, &field.eq)?;
                for tok in &field.value {
                    write_token(f, tok)?;
                }
                if let Some(semi) = &field.semi {
                    write_token(f, semi)?;
                }
            }
            Item::Block(block) => {
                write_token(f, &block.name)?;
                if let Some(label) = &block.label {
                    write_token(f, label)?;
                }
                write_token(f, &block.open)?;
                write_items(f, &block.items)?;
                if let Some(close) = &block.close {
                    write_token(f, close)?;
                }
            }
        }
    }
    Ok(())
}

fn find_field_mut<'a>(
    items: &'a mut Vec<Item>,
    pred: &dyn Fn(&str) -> bool,
) -> Option<&'a mut Field> {
    for item in items.iter_mut() {
        match item {
            Item::Field(field) if pred(&field.key.text) => return Some(field),
            Item::Block(block) => {
                if let Some(field) = find_field_mut(&mut block.items, pred) {
                    return Some(field);
                }
            }
            _ => {}
        }
    }
    None
}

fn find_field<'a>(items: &'a [Item], key: &str) -> Option<&'a Field> {
    for item in items {
        match item {
            Item::Field(field) if field.key.text == key => return Some(field),
            Item::Block(block) => {
                if let Some(field) = find_field(&block.items, key) {
                    return Some(field);
                }
            }
            _ => {}
        }
    }
    None
}

fn drop_extra_fields(items: &mut Vec<Item>, pred: &dyn Fn(&str) -> bool, seen: &mut bool) {
    items.retain_mut(|item| match item {
        Item::Field(field) if pred(&field.key.text) => {
            if *seen {
                false
            } else {
                *seen = true;
                true
            }
        }
        Item::Block(block) => {
            drop_extra_fields(&mut block.items, pred, seen);
            true
        }
        _ => true,
    });
}

/// Split `text` into tokens plus the trivia left after the final token.
fn lex(text: &str) -> (Vec<Token>, String) {
    let b = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut lead_start = 0;

    while i < b.len() {
        let c = b[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        // Comments are trivia.
        if c == b'#' || (c == b'/' && b.get(i + 1) == Some(&b'/')) {
            while i < b.len() && b[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c == b'/' && b.get(i + 1) == Some(&b'*') {
            i += 2;
            while i < b.len() && !(b[i] == b'*' && b.get(i + 1) == Some(&b'/')) {
                i += 1;
            }
            i = (i + 2).min(b.len());
            continue;
        }

        let start = i;
        let kind;
        if c == b'"' {
            i += 1;
            while i < b.len() && b[i] != b'"' && b[i] != b'\n' {
                i += 1;
            }
            if i < b.len() && b[i] == b'"' {
                i += 1;
            }
            kind = TokKind::Str;
        } else if c.is_ascii_alphanumeric() || c == b'_' {
            while i < b.len() && (b[i].is_ascii_alphanumeric() || matches!(b[i], b'_' | b'.' | b'-'))
            {
                i += 1;
            }
            // Array type suffix, e.g. `string[]`, is part of the identifier.
            if b.get(i) == Some(&b'[') && b.get(i + 1) == Some(&b']') {
                i += 2;
            }
            kind = TokKind::Ident;
        } else {
            i += 1;
            kind = TokKind::Punct;
        }

        tokens.push(Token {
            lead: text[lead_start..start].to_string(),
            text: text[start..i].to_string(),
            kind,
        });
        lead_start = i;
    }

    (tokens, text[lead_start..].to_string())
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        tok
    }

    fn is_punct(&self, ahead: usize, ch: &str) -> bool {
        self.peek(ahead)
            .is_some_and(|t| t.kind == TokKind::Punct && t.text == ch)
    }

    fn is_kind(&self, ahead: usize, kind: TokKind) -> bool {
        self.peek(ahead).is_some_and(|t| t.kind == kind)
    }

    /// Parse items until EOF or, inside a block, the matching `}`.
    fn parse_items(&mut self, inside_block: bool) -> (Vec<Item>, Option<Token>) {
        let mut items = Vec::new();
        loop {
            if self.peek(0).is_none() {
                return (items, None);
            }
            if inside_block && self.is_punct(0, "}") {
                let close = self.bump();
                return (items, Some(close));
            }
            if self.is_kind(0, TokKind::Ident) {
                if self.is_punct(1, "=") {
                    let key = self.bump();
                    items.push(self.parse_field(None, key));
                    continue;
                }
                if self.is_kind(1, TokKind::Ident) && self.is_punct(2, "=") {
                    let ty = self.bump();
                    let key = self.bump();
                    items.push(self.parse_field(Some(ty), key));
                    continue;
                }
                if self.is_punct(1, "{") {
                    let name = self.bump();
                    items.push(self.parse_block(name, None));
                    continue;
                }
                if self.is_kind(1, TokKind::Str) && self.is_punct(2, "{") {
                    let name = self.bump();
                    let label = self.bump();
                    items.push(self.parse_block(name, Some(label)));
                    continue;
                }
            }
            items.push(Item::Stray(self.bump()));
        }
    }

    fn parse_field(&mut self, ty: Option<Token>, key: Token) -> Item {
        let eq = self.bump();
        let mut value = Vec::new();
        let mut depth = 0usize;
        let mut semi = None;
        loop {
            let Some(tok) = self.peek(0) else { break };
            if depth == 0 && tok.kind == TokKind::Punct && tok.text == ";" {
                semi = Some(self.bump());
                break;
            }
            // An unbalanced `}` closes the enclosing block, not this value.
            if depth == 0 && tok.kind == TokKind::Punct && tok.text == "}" {
                break;
            }
            if tok.kind == TokKind::Punct && tok.text == "{" {
                depth += 1;
            } else if tok.kind == TokKind::Punct && tok.text == "}" {
                depth -= 1;
            }
            value.push(self.bump());
        }
        Item::Field(Field {
            ty,
            key,
            eq,
            value,
            semi,
        })
    }

    fn parse_block(&mut self, name: Token, label: Option<Token>) -> Item {
        let open = self.bump();
        let (items, close) = self.parse_items(true);
        Item::Block(Block {
            name,
            label,
            open,
            items,
            close,
            depth: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"Manifest {
    string name = "foo";
    string version = "1.0.0";
    /* integrity */
    string archive_sha256 = "aaaa";
    bool signed = false;

    Extra "nested" {
        int weight = 3;
    }
}
"#;

    #[test]
    fn test_round_trip_verbatim() {
        let doc = Document::parse(SAMPLE);
        assert_eq!(doc.to_string(), SAMPLE);
    }

    #[test]
    fn test_round_trip_preserves_odd_formatting() {
        let text = "Manifest {\n\tstring   name= \"x\" ;\n  // trailing comment\n}";
        let doc = Document::parse(text);
        assert_eq!(doc.to_string(), text);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut doc = Document::parse(SAMPLE);
        doc.upsert_field(
            "string",
            "archive_sha256",
            &["archive_sha"],
            &FieldValue::str("bbbb"),
        );
        let out = doc.to_string();
        assert_eq!(out, SAMPLE.replace("\"aaaa\"", "\"bbbb\""));
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut doc = Document::parse(SAMPLE);
        doc.upsert_field(
            "string",
            "archive_sha256",
            &["archive_sha"],
            &FieldValue::str("bbbb"),
        );
        let once = doc.to_string();
        doc.upsert_field(
            "string",
            "archive_sha256",
            &["archive_sha"],
            &FieldValue::str("bbbb"),
        );
        assert_eq!(doc.to_string(), once);
    }

    #[test]
    fn test_upsert_canonicalizes_alias() {
        let text = "Manifest {\n    string archive_sha = \"old\";\n}\n";
        let mut doc = Document::parse(text);
        doc.upsert_field(
            "string",
            "archive_sha256",
            &["archive_sha"],
            &FieldValue::str("new"),
        );
        assert_eq!(
            doc.to_string(),
            "Manifest {\n    string archive_sha256 = \"new\";\n}\n"
        );
    }

    #[test]
    fn test_upsert_drops_duplicate_equivalents() {
        let text =
            "Manifest {\n    string archive_sha = \"a\";\n    string archive_sha256 = \"b\";\n}\n";
        let mut doc = Document::parse(text);
        doc.upsert_field(
            "string",
            "archive_sha256",
            &["archive_sha"],
            &FieldValue::str("c"),
        );
        assert_eq!(
            doc.to_string(),
            "Manifest {\n    string archive_sha256 = \"c\";\n}\n"
        );
    }

    #[test]
    fn test_upsert_inserts_before_closing_brace() {
        let text = "Manifest {\n    string name = \"foo\";\n}\n";
        let mut doc = Document::parse(text);
        doc.upsert_field("string", "archive_sha256", &[], &FieldValue::str("cafe"));
        assert_eq!(
            doc.to_string(),
            "Manifest {\n    string name = \"foo\";\n    string archive_sha256 = \"cafe\";\n}\n"
        );
    }

    #[test]
    fn test_upsert_into_single_line_block() {
        let text = "Manifest { string name = \"foo\"; }";
        let mut doc = Document::parse(text);
        doc.upsert_field("string", "archive_sha256", &[], &FieldValue::str("cafe"));
        assert_eq!(
            doc.to_string(),
            "Manifest { string name = \"foo\";\n    string archive_sha256 = \"cafe\";\n}"
        );
    }

    #[test]
    fn test_upsert_appends_without_block() {
        let mut doc = Document::parse("just some text");
        doc.upsert_field("string", "archive_sha256", &[], &FieldValue::str("cafe"));
        assert_eq!(
            doc.to_string(),
            "just some text\n    string archive_sha256 = \"cafe\";\n"
        );
    }

    #[test]
    fn test_upsert_preserves_comment_and_nested_block() {
        let mut doc = Document::parse(SAMPLE);
        doc.upsert_field("string", "pkg_url", &[], &FieldValue::str("http://x"));
        let out = doc.to_string();
        assert!(out.contains("/* integrity */"));
        assert!(out.contains("Extra \"nested\" {"));
        assert!(out.contains("int weight = 3;"));
        assert!(out.contains("string pkg_url = \"http://x\";"));
    }

    #[test]
    fn test_get_field_unquotes() {
        let doc = Document::parse(SAMPLE);
        assert_eq!(doc.get_field("name").as_deref(), Some("foo"));
        assert_eq!(doc.get_field("signed").as_deref(), Some("false"));
        assert_eq!(doc.get_field("weight").as_deref(), Some("3"));
        assert_eq!(doc.get_field("missing"), None);
    }

    #[test]
    fn test_generated_manifest_shape() {
        let mut root = Block::new("Manifest", None, 0);
        root.push_field("string", "name", &FieldValue::str("foo"));
        root.push_field("string", "version", &FieldValue::str("1.0.0"));
        root.push_field("bool", "signed", &FieldValue::Bool(false));
        let doc = Document::from_root(root);
        assert_eq!(
            doc.to_string(),
            "Manifest {\n    string name = \"foo\";\n    string version = \"1.0.0\";\n    bool signed = false;\n}\n"
        );
    }

    #[test]
    fn test_generated_nested_blocks_and_lists() {
        let mut root = Block::new("Registry", None, 0);
        root.push_field("int", "priority", &FieldValue::Int(100));
        root.push_blank();
        root.push_comment("/* bar package */");
        let mut pkg = Block::new("Package", Some("bar"), 1);
        pkg.push_field(
            "string[]",
            "versions",
            &FieldValue::List(vec!["2.0.0".into(), "1.0.0".into()]),
        );
        root.push_block(pkg);
        let doc = Document::from_root(root);
        assert_eq!(
            doc.to_string(),
            "Registry {\n    int priority = 100;\n\n    /* bar package */\n    Package \"bar\" {\n        string[] versions = { \"2.0.0\", \"1.0.0\" };\n    }\n}\n"
        );
    }

    #[test]
    fn test_generated_then_parsed_round_trips() {
        let mut root = Block::new("Manifest", None, 0);
        root.push_field("string", "sha256", &FieldValue::str("ff"));
        let text = Document::from_root(root).to_string();
        assert_eq!(Document::parse(&text).to_string(), text);
    }
}
