//! Recognizing the canonical special-form heads of §6.1.
//!
//! The analyzer is structural (§9 design notes): it keys on the symbol at
//! the head of an S-expression, never on a static type. This module is the
//! one place that maps surface spelling (including the synonym groups
//! §6.1 and §4.3/§4.11/§4.12 call out) onto a closed set of `Head`s the
//! rest of the pipeline switches on.

use ward_core::Value;

/// One semantic value tree, borrowed for the lifetime of the arena that
/// owns it. This is the type every pass in the pipeline walks.
pub type Expr<'a> = &'a Value<'a>;

/// The canonical special forms recognized by the pipeline, after folding
/// surface synonyms together (`defn`≡`define`, `fn`≡`lambda`, `go`/`async`/
/// `thread`≡`spawn`, `deftype`≡`defstruct`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Head {
    Define,
    Let,
    LetStar,
    Letrec,
    Lambda,
    If,
    Quote,
    SetBang,
    Begin,
    Spawn,
    Send,
    Recv,
    Close,
    Atom,
    Swap,
    Reset,
    CompareAndSwap,
    ForEach,
    Map,
    Filter,
    Fold,
    Reduce,
    While,
    Loop,
    DefStruct,
}

impl Head {
    /// Classify a symbol naming the head of an application, if it names
    /// one of the canonical special forms. Anything else is an ordinary
    /// application (primitive call or user-function call).
    pub fn from_name(name: &str) -> Option<Head> {
        Some(match name {
            "define" | "defn" => Head::Define,
            "let" => Head::Let,
            "let*" => Head::LetStar,
            "letrec" => Head::Letrec,
            "lambda" | "fn" => Head::Lambda,
            "if" => Head::If,
            "quote" => Head::Quote,
            "set!" => Head::SetBang,
            "begin" => Head::Begin,
            "spawn" | "thread" | "go" | "async" => Head::Spawn,
            "send!" => Head::Send,
            "recv!" => Head::Recv,
            "close!" => Head::Close,
            "atom" => Head::Atom,
            "swap!" => Head::Swap,
            "reset!" => Head::Reset,
            "compare-and-swap!" => Head::CompareAndSwap,
            "for-each" => Head::ForEach,
            "map" => Head::Map,
            "filter" => Head::Filter,
            "fold" => Head::Fold,
            "reduce" => Head::Reduce,
            "while" => Head::While,
            "loop" => Head::Loop,
            "defstruct" | "deftype" => Head::DefStruct,
            _ => return None,
        })
    }

    /// `true` for the forms §4.3 treats as loop-shaped (LoopHead/LoopExit).
    pub fn is_loop(self) -> bool {
        matches!(
            self,
            Head::While | Head::Loop | Head::ForEach | Head::Map | Head::Filter | Head::Fold
        )
    }

    /// `true` for the forms that introduce a new lexical scope / region
    /// (§4.9), i.e. `let`-family bindings and `lambda`.
    pub fn introduces_region(self) -> bool {
        matches!(self, Head::Let | Head::LetStar | Head::Letrec | Head::Lambda)
    }
}

/// If `expr` is an application `(head ...)`, return the head symbol name
/// and the argument expressions (in source order). Returns `None` for
/// anything that is not a non-empty proper list headed by a symbol.
pub fn application<'a>(expr: Expr<'a>) -> Option<(&'a str, Vec<Expr<'a>>)> {
    let (items, tail) = expr.to_vec();
    if tail.is_some() || items.is_empty() {
        return None;
    }
    let head = items[0].as_symbol()?;
    Some((head, items[1..].to_vec()))
}

/// Classify `expr`'s head as a canonical special form, if it has one.
pub fn classify<'a>(expr: Expr<'a>) -> Option<(Head, Vec<Expr<'a>>)> {
    let (name, args) = application(expr)?;
    Head::from_name(name).map(|h| (h, args))
}

/// Primitive forms that always allocate (§4.11): constructors and
/// resource-creating builtins.
pub fn is_allocating_primitive(name: &str) -> bool {
    matches!(name, "cons" | "list" | "pair" | "box" | "make-chan") || name.starts_with("mk-")
}

/// Primitive forms that mutate (§4.11).
pub fn is_mutating_primitive(name: &str) -> bool {
    matches!(name, "set!" | "set-box!")
}

/// Primitive forms that perform I/O (§4.11).
pub fn is_io_primitive(name: &str) -> bool {
    matches!(name, "display" | "print" | "read" | "write")
}

/// Primitive forms that raise (§4.11).
pub fn is_throwing_primitive(name: &str) -> bool {
    matches!(name, "error" | "raise")
}

/// Primitive forms with concurrency effects (§4.11).
pub fn is_concurrent_primitive(name: &str) -> bool {
    matches!(name, "spawn" | "go" | "send!" | "recv!" | "select")
}

/// Primitive forms that free their argument explicitly (§4.11): marks the
/// corresponding parameter `Consumed` in a function summary.
pub fn is_free_primitive(name: &str) -> bool {
    matches!(name, "free" | "free!")
}

/// Parse a `let`/`let*`/`letrec` binding list, `((x expr1) (y expr2) ...)`,
/// into ordered `(name, value_expr)` pairs. Malformed entries are skipped
/// (the caller reports a structural diagnostic if the result looks empty
/// where bindings were expected).
pub fn parse_bindings<'a>(bindings_list: Expr<'a>) -> Vec<(&'a str, Expr<'a>)> {
    let (entries, _tail) = bindings_list.to_vec();
    entries
        .into_iter()
        .filter_map(|entry| {
            let (items, tail) = entry.to_vec();
            if tail.is_some() || items.len() != 2 {
                return None;
            }
            let name = items[0].as_symbol()?;
            Some((name, items[1]))
        })
        .collect()
}
