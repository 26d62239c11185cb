// Rule Expression Engine - compiles and evaluates the per-operation
// authorization/filter DSL. Purpose-built grammar: comparisons joined by
// && and ||, null-safe dotted access over two namespaces (@request.* and
// bare collection field names). Evaluation fails closed.

use crate::error::{RecordError, Result};
use crate::schema::{Collection, Operation, SUPERUSER_ONLY};
use serde_json::{json, Map, Value};

/// Caller-supplied request context for rule evaluation.
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    /// Authenticated identity record, or null for guests.
    pub auth: Value,
    /// Submitted request body.
    pub body: Value,
    /// Query-string parameters.
    pub query: Value,
    /// Route parameters.
    pub params: Value,
    /// Privileged contexts bypass every rule.
    pub superuser: bool,
}

impl RuleContext {
    pub fn guest() -> Self {
        RuleContext::default()
    }

    pub fn superuser() -> Self {
        RuleContext {
            superuser: true,
            ..RuleContext::default()
        }
    }

    pub fn with_auth(auth: Value) -> Self {
        RuleContext {
            auth,
            ..RuleContext::default()
        }
    }

    fn request_value(&self) -> Value {
        json!({
            "auth": self.auth,
            "body": self.body,
            "query": self.query,
            "params": self.params,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Like => "~",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Operand {
    Literal(Value),
    /// Dotted path; a leading "@request" segment selects the request
    /// namespace, otherwise the root is a candidate-record field.
    Path(Vec<String>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp {
        left: Operand,
        op: CmpOp,
        right: Operand,
    },
}

/// A rule ready for evaluation. The empty rule and the superuser sentinel
/// never reach the parser.
#[derive(Debug, Clone)]
pub enum CompiledRule {
    Allow,
    Superuser,
    Expr(Expr),
}

impl CompiledRule {
    /// Evaluate against the merged request + candidate-record context.
    /// Never raises: anything unresolvable is null, anything incomparable
    /// is false.
    pub fn evaluate(&self, ctx: &RuleContext, record: &Map<String, Value>) -> bool {
        match self {
            CompiledRule::Allow => true,
            CompiledRule::Superuser => ctx.superuser,
            CompiledRule::Expr(expr) => eval_expr(expr, ctx, record),
        }
    }
}

/// Compile a rule string. `""` allows unconditionally and `SUPERUSER_ONLY`
/// denies non-privileged access; neither is parsed. A rule that is only a
/// bare literal (no comparison) is structurally invalid.
pub fn compile(rule: &str) -> Result<CompiledRule> {
    let trimmed = rule.trim();
    if trimmed.is_empty() {
        return Ok(CompiledRule::Allow);
    }
    if trimmed == SUPERUSER_ONLY {
        return Ok(CompiledRule::Superuser);
    }

    let tokens = lex(trimmed).map_err(|message| syntax_error(rule, message))?;
    let expr = Parser::new(tokens)
        .parse()
        .map_err(|message| syntax_error(rule, message))?;
    Ok(CompiledRule::Expr(expr))
}

/// Statically check a rule against the known variable namespace at
/// schema-edit time: every identifier must resolve to `@request.auth|
/// body|query|params` or to a field of the collection.
pub fn lint(rule: &str, collection: &Collection) -> Result<()> {
    let compiled = compile(rule)?;
    let CompiledRule::Expr(expr) = compiled else {
        return Ok(());
    };

    let mut paths = Vec::new();
    collect_paths(&expr, &mut paths);
    for path in paths {
        if path[0] == "@request" {
            let known = matches!(
                path.get(1).map(String::as_str),
                Some("auth" | "body" | "query" | "params")
            );
            if !known {
                return Err(syntax_error(
                    rule,
                    format!("Unknown request namespace in '{}'", path.join(".")),
                ));
            }
        } else if !collection.has_field(&path[0]) {
            return Err(syntax_error(
                rule,
                format!("Unknown field '{}' in collection '{}'", path[0], collection.name),
            ));
        }
    }
    Ok(())
}

/// Authorize one operation against a concrete candidate record. `list` is
/// special-cased to authorize: its access control is enforced by filter
/// interpolation, not per-record evaluation. A missing or uncompilable
/// rule denies (fail closed); a privileged context always passes.
pub fn authorize(
    op: Operation,
    rule: Option<&str>,
    ctx: &RuleContext,
    record: &Map<String, Value>,
) -> bool {
    if ctx.superuser {
        return true;
    }
    if op == Operation::List {
        return true;
    }
    let Some(rule) = rule else {
        return false;
    };
    match compile(rule) {
        Ok(compiled) => compiled.evaluate(ctx, record),
        Err(_) => false,
    }
}

/// Substitute every `@request.*` reference with its current value as a
/// literal, producing a context-free filter string for the query layer.
pub fn interpolate(rule: &str, ctx: &RuleContext) -> Result<String> {
    let trimmed = rule.trim();
    if trimmed.is_empty() || trimmed == SUPERUSER_ONLY {
        return Ok(trimmed.to_string());
    }

    let tokens = lex(trimmed).map_err(|message| syntax_error(rule, message))?;
    let mut out: Vec<String> = Vec::new();
    for token in tokens {
        let text = match token {
            Token::Ident(name) if name.starts_with("@request") => {
                let path: Vec<String> = name.split('.').map(str::to_string).collect();
                let value = resolve_request(&path, ctx);
                render_literal(&value)
            }
            Token::Ident(name) => name,
            Token::Number(n) => render_number(n),
            Token::Str(s) => render_literal(&Value::String(s)),
            Token::True => "true".into(),
            Token::False => "false".into(),
            Token::Null => "null".into(),
            Token::Op(op) => op.symbol().into(),
            Token::And => "&&".into(),
            Token::Or => "||".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
        };
        out.push(text);
    }
    Ok(out.join(" "))
}

/// AND-combine a rule-derived filter with a caller-supplied one.
pub fn combine_filters(rule_filter: &str, caller_filter: &str) -> String {
    match (rule_filter.trim(), caller_filter.trim()) {
        ("", "") => String::new(),
        (rule, "") => rule.to_string(),
        ("", caller) => caller.to_string(),
        (rule, caller) => format!("({rule}) && ({caller})"),
    }
}

fn syntax_error(rule: &str, message: String) -> RecordError {
    RecordError::RuleSyntax {
        rule: rule.to_string(),
        message,
    }
}

// ── Evaluation ───────────────────────────────────────────────────

fn eval_expr(expr: &Expr, ctx: &RuleContext, record: &Map<String, Value>) -> bool {
    match expr {
        Expr::And(left, right) => eval_expr(left, ctx, record) && eval_expr(right, ctx, record),
        Expr::Or(left, right) => eval_expr(left, ctx, record) || eval_expr(right, ctx, record),
        Expr::Cmp { left, op, right } => {
            let lhs = resolve_operand(left, ctx, record);
            let rhs = resolve_operand(right, ctx, record);
            compare(&lhs, *op, &rhs)
        }
    }
}

fn resolve_operand(operand: &Operand, ctx: &RuleContext, record: &Map<String, Value>) -> Value {
    match operand {
        Operand::Literal(value) => value.clone(),
        Operand::Path(path) => {
            if path[0] == "@request" {
                resolve_request(path, ctx)
            } else {
                let root = record.get(&path[0]).cloned().unwrap_or(Value::Null);
                walk(root, &path[1..])
            }
        }
    }
}

fn resolve_request(path: &[String], ctx: &RuleContext) -> Value {
    walk(ctx.request_value(), &path[1..])
}

/// Null-safe dotted descent: a missing intermediate key is null, not an
/// error.
fn walk(mut current: Value, segments: &[String]) -> Value {
    for segment in segments {
        current = match current {
            Value::Object(mut map) => map.remove(segment).unwrap_or(Value::Null),
            _ => return Value::Null,
        };
    }
    current
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    match op {
        CmpOp::Eq => loose_eq(left, right),
        CmpOp::Ne => !loose_eq(left, right),
        CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => ordered(left, op, right),
        CmpOp::Like => like(left, right),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn ordered(left: &Value, op: CmpOp, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    // Incomparable operands deny rather than raise.
    match ordering {
        Some(ord) => match op {
            CmpOp::Gt => ord.is_gt(),
            CmpOp::Ge => ord.is_ge(),
            CmpOp::Lt => ord.is_lt(),
            CmpOp::Le => ord.is_le(),
            _ => false,
        },
        None => false,
    }
}

/// Case-insensitive LIKE. `%` wildcards anchor a full match; a pattern
/// without wildcards is a contains check.
fn like(left: &Value, right: &Value) -> bool {
    let (Some(haystack), Some(pattern)) = (text_of(left), text_of(right)) else {
        return false;
    };
    if pattern.contains('%') {
        let escaped: Vec<String> = pattern.split('%').map(|p| regex::escape(p)).collect();
        let full = format!("(?i)^{}$", escaped.join(".*"));
        match regex::Regex::new(&full) {
            Ok(re) => re.is_match(&haystack),
            Err(_) => false,
        }
    } else {
        haystack.to_lowercase().contains(&pattern.to_lowercase())
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // serde_json string rendering matches the lexer's quoting rules.
        other => serde_json::to_string(other).unwrap_or_else(|_| "null".into()),
    }
}

fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn collect_paths<'a>(expr: &'a Expr, out: &mut Vec<&'a Vec<String>>) {
    match expr {
        Expr::And(left, right) | Expr::Or(left, right) => {
            collect_paths(left, out);
            collect_paths(right, out);
        }
        Expr::Cmp { left, right, .. } => {
            for operand in [left, right] {
                if let Operand::Path(path) = operand {
                    out.push(path);
                }
            }
        }
    }
}

// ── Lexer ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Op(CmpOp),
    And,
    Or,
    LParen,
    RParen,
}

fn lex(input: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 1;
            }
            '~' => {
                tokens.push(Token::Op(CmpOp::Like));
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                } else {
                    return Err("Expected '=' after '!'".into());
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err("Expected '&&'".into());
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err("Expected '||'".into());
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("Unterminated string".into()),
                        Some('\\') => {
                            if let Some(escaped) = chars.get(i + 1) {
                                s.push(*escaped);
                                i += 2;
                            } else {
                                return Err("Dangling escape".into());
                            }
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' | '-' => {
                let start = i;
                if c == '-' {
                    i += 1;
                    if !matches!(chars.get(i), Some('0'..='9')) {
                        return Err("Expected digits after '-'".into());
                    }
                }
                while matches!(chars.get(i), Some('0'..='9') | Some('.')) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text.parse().map_err(|_| format!("Invalid number '{text}'"))?;
                tokens.push(Token::Number(n));
            }
            '@' | 'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while matches!(
                    chars.get(i),
                    Some('@' | 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.')
                ) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(match text.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(text),
                });
            }
            other => return Err(format!("Unexpected character '{other}'")),
        }
    }

    if tokens.is_empty() {
        return Err("Empty rule".into());
    }
    Ok(tokens)
}

// ── Parser ───────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn parse(mut self) -> std::result::Result<Expr, String> {
        let expr = self.parse_or()?;
        if self.pos != self.tokens.len() {
            return Err("Trailing input after expression".into());
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.parse_unit()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_unit()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unit(&mut self) -> std::result::Result<Expr, String> {
        if self.peek() == Some(&Token::LParen) {
            self.advance();
            let expr = self.parse_or()?;
            if self.advance() != Some(Token::RParen) {
                return Err("Expected ')'".into());
            }
            return Ok(expr);
        }

        let left = self.parse_operand()?;
        let op = match self.advance() {
            Some(Token::Op(op)) => op,
            // A bare literal or identifier is not a rule.
            _ => return Err("A valid rule must contain a comparison".into()),
        };
        let right = self.parse_operand()?;
        Ok(Expr::Cmp { left, op, right })
    }

    fn parse_operand(&mut self) -> std::result::Result<Operand, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Operand::Literal(json!(n))),
            Some(Token::Str(s)) => Ok(Operand::Literal(Value::String(s))),
            Some(Token::True) => Ok(Operand::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Operand::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Operand::Literal(Value::Null)),
            Some(Token::Ident(name)) => {
                let path: Vec<String> = name.split('.').map(str::to_string).collect();
                if path.iter().any(String::is_empty) {
                    return Err(format!("Malformed identifier '{name}'"));
                }
                Ok(Operand::Path(path))
            }
            other => Err(format!("Expected operand, found {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Collection, CollectionField, CollectionKind, FieldKind};
    use pretty_assertions::assert_eq;

    fn record(pairs: &[(&str, Value)]) -> Map<String, Value> {
        let mut map = Map::new();
        for (key, value) in pairs {
            map.insert(key.to_string(), value.clone());
        }
        map
    }

    fn auth_ctx(id: &str) -> RuleContext {
        RuleContext::with_auth(json!({ "id": id }))
    }

    fn eval(rule: &str, ctx: &RuleContext, rec: &Map<String, Value>) -> bool {
        compile(rule).unwrap().evaluate(ctx, rec)
    }

    #[test]
    fn test_empty_rule_allows() {
        let rec = record(&[]);
        assert!(eval("", &RuleContext::guest(), &rec));
    }

    #[test]
    fn test_superuser_sentinel() {
        let rec = record(&[]);
        assert!(!eval(SUPERUSER_ONLY, &RuleContext::guest(), &rec));
        assert!(eval(SUPERUSER_ONLY, &RuleContext::superuser(), &rec));
    }

    #[test]
    fn test_auth_id_match() {
        let rec = record(&[("id", json!("abc123"))]);
        assert!(eval("@request.auth.id = id", &auth_ctx("abc123"), &rec));
        assert!(!eval("@request.auth.id = id", &auth_ctx("zzz"), &rec));
    }

    #[test]
    fn test_null_auth_is_false_not_error() {
        let rec = record(&[("id", json!("abc123"))]);
        assert!(!eval("@request.auth.id = id", &RuleContext::guest(), &rec));
    }

    #[test]
    fn test_bare_literal_is_invalid() {
        assert!(matches!(compile("42"), Err(RecordError::RuleSyntax { .. })));
        assert!(matches!(compile("'str'"), Err(RecordError::RuleSyntax { .. })));
        assert!(matches!(compile("status"), Err(RecordError::RuleSyntax { .. })));
    }

    #[test]
    fn test_boolean_combination_and_parens() {
        let rec = record(&[("status", json!("published")), ("views", json!(10))]);
        let ctx = RuleContext::guest();
        assert!(eval("status = 'published' && views >= 10", &ctx, &rec));
        assert!(!eval("status = 'draft' && views >= 10", &ctx, &rec));
        assert!(eval("(status = 'draft' || views > 5) && views < 99", &ctx, &rec));
    }

    #[test]
    fn test_comparison_operators() {
        let rec = record(&[("views", json!(10)), ("title", json!("Hello World"))]);
        let ctx = RuleContext::guest();
        assert!(eval("views != 11", &ctx, &rec));
        assert!(eval("views <= 10", &ctx, &rec));
        assert!(eval("views > 9.5", &ctx, &rec));
        assert!(eval("title ~ 'hello'", &ctx, &rec));
        assert!(eval("title ~ 'hello%'", &ctx, &rec));
        assert!(!eval("title ~ '%nope%'", &ctx, &rec));
    }

    #[test]
    fn test_incomparable_operands_deny() {
        let rec = record(&[("title", json!("abc"))]);
        let ctx = RuleContext::guest();
        assert!(!eval("title > 5", &ctx, &rec));
        assert!(!eval("missing > 5", &ctx, &rec));
    }

    #[test]
    fn test_null_comparisons() {
        let rec = record(&[("deleted", Value::Null)]);
        let ctx = RuleContext::guest();
        assert!(eval("deleted = null", &ctx, &rec));
        assert!(eval("missing = null", &ctx, &rec));
        assert!(!eval("deleted != null", &ctx, &rec));
    }

    #[test]
    fn test_request_body_namespace() {
        let rec = record(&[]);
        let ctx = RuleContext {
            body: json!({ "token": "secret" }),
            ..RuleContext::default()
        };
        assert!(eval("@request.body.token = 'secret'", &ctx, &rec));
        assert!(!eval("@request.body.other = 'secret'", &ctx, &rec));
    }

    #[test]
    fn test_lint_accepts_known_names() {
        let mut collection = Collection::new("posts", CollectionKind::Base);
        collection.fields.push(CollectionField::new("status", FieldKind::Text));
        lint("status = 'x' && @request.auth.id != null", &collection).unwrap();
    }

    #[test]
    fn test_lint_rejects_unknown_field() {
        let collection = Collection::new("posts", CollectionKind::Base);
        let err = lint("missing_field = 'x'", &collection).unwrap_err();
        assert!(matches!(err, RecordError::RuleSyntax { .. }));
        assert!(err.to_string().contains("missing_field"));
    }

    #[test]
    fn test_lint_rejects_unknown_namespace() {
        let collection = Collection::new("posts", CollectionKind::Base);
        assert!(lint("@request.cookies.session = 'x'", &collection).is_err());
    }

    #[test]
    fn test_lint_skips_empty_and_sentinel() {
        let collection = Collection::new("posts", CollectionKind::Base);
        lint("", &collection).unwrap();
        lint(SUPERUSER_ONLY, &collection).unwrap();
    }

    #[test]
    fn test_authorize_list_always_passes() {
        let rec = record(&[]);
        assert!(authorize(
            Operation::List,
            Some(SUPERUSER_ONLY),
            &RuleContext::guest(),
            &rec
        ));
    }

    #[test]
    fn test_authorize_superuser_bypasses() {
        let rec = record(&[]);
        assert!(authorize(
            Operation::Delete,
            Some(SUPERUSER_ONLY),
            &RuleContext::superuser(),
            &rec
        ));
    }

    #[test]
    fn test_authorize_missing_rule_denies() {
        let rec = record(&[]);
        assert!(!authorize(Operation::Delete, None, &RuleContext::guest(), &rec));
    }

    #[test]
    fn test_interpolate_substitutes_request_values() {
        let ctx = auth_ctx("u1");
        let out = interpolate("owner = @request.auth.id", &ctx).unwrap();
        assert_eq!(out, "owner = \"u1\"");

        // The interpolated output is itself a valid rule.
        let rec = record(&[("owner", json!("u1"))]);
        assert!(eval(&out, &RuleContext::guest(), &rec));
    }

    #[test]
    fn test_interpolate_null_auth() {
        let out = interpolate("owner = @request.auth.id", &RuleContext::guest()).unwrap();
        assert_eq!(out, "owner = null");
    }

    #[test]
    fn test_combine_filters() {
        assert_eq!(combine_filters("", ""), "");
        assert_eq!(combine_filters("a = 1", ""), "a = 1");
        assert_eq!(combine_filters("", "b = 2"), "b = 2");
        assert_eq!(combine_filters("a = 1", "b = 2"), "(a = 1) && (b = 2)");
    }

    #[test]
    fn test_runtime_error_recovers_as_deny() {
        // Descending through a scalar is null-safe, not an error.
        let rec = record(&[("title", json!("abc"))]);
        assert!(!eval("title.sub.key = 'x'", &RuleContext::guest(), &rec));
    }
}
