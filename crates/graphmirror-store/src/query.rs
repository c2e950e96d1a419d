//! Parser for the query subset graphmirror emits.
//!
//! The in-memory backend does not implement SPARQL; it interprets exactly
//! the programs this system generates: `SELECT DISTINCT *` over a basic
//! graph pattern with nested `OPTIONAL` groups, `SELECT (COUNT(*) AS ?n)`
//! in-degree probes, `DELETE WHERE` with one triple pattern, and
//! subject-grouped `INSERT DATA`. Anything else is a hard
//! [`StoreError::UnsupportedQuery`] — guessing at semantics here would be
//! worse than failing.

use graphmirror_rdf::{Literal, Term, Triple};
use std::collections::HashMap;

use crate::StoreError;

/// A term position in a pattern: bound term or variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatTerm {
    Var(String),
    Term(Term),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: PatTerm,
    pub predicate: PatTerm,
    pub object: PatTerm,
}

/// One element of a group graph pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternItem {
    Triple(TriplePattern),
    Optional(Vec<PatternItem>),
}

/// One parsed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOp {
    Select {
        distinct: bool,
        /// `Some(var)` for the COUNT(*) aggregate form.
        count: Option<String>,
        pattern: Vec<PatternItem>,
    },
    DeleteWhere {
        pattern: Vec<TriplePattern>,
    },
    InsertData {
        triples: Vec<Triple>,
    },
}

const RDF_TYPE_IRI: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    /// Bare word: keyword, `a`, prefixed name, or `prefix:` declaration head.
    Word(String),
    Var(String),
    Iri(String),
    Literal(Literal),
    Punct(char),
}

fn unsupported(msg: impl Into<String>) -> StoreError {
    StoreError::UnsupportedQuery(msg.into())
}

fn tokenize(input: &str) -> Result<Vec<Tok>, StoreError> {
    let mut toks = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '<' => {
                chars.next();
                let mut iri = String::new();
                loop {
                    match chars.next() {
                        Some((_, '>')) => break,
                        Some((_, ch)) => iri.push(ch),
                        None => return Err(unsupported("unterminated IRI reference")),
                    }
                }
                toks.push(Tok::Iri(iri));
            }
            '?' => {
                chars.next();
                let mut name = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(unsupported("empty variable name"));
                }
                toks.push(Tok::Var(name));
            }
            '"' => {
                chars.next();
                let mut lexical = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\\')) => match chars.next() {
                            Some((_, 'n')) => lexical.push('\n'),
                            Some((_, 'r')) => lexical.push('\r'),
                            Some((_, 't')) => lexical.push('\t'),
                            Some((_, ch)) => lexical.push(ch),
                            None => return Err(unsupported("dangling escape in literal")),
                        },
                        Some((_, '"')) => break,
                        Some((_, ch)) => lexical.push(ch),
                        None => return Err(unsupported("unterminated literal")),
                    }
                }
                // Optional @lang or ^^datatype suffix.
                let mut language = None;
                let mut datatype = None;
                if let Some(&(_, '@')) = chars.peek() {
                    chars.next();
                    let mut lang = String::new();
                    while let Some(&(_, ch)) = chars.peek() {
                        if ch.is_ascii_alphanumeric() || ch == '-' {
                            lang.push(ch);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    language = Some(lang);
                } else if let Some(&(_, '^')) = chars.peek() {
                    chars.next();
                    match chars.next() {
                        Some((_, '^')) => {}
                        _ => return Err(unsupported("expected ^^ before datatype")),
                    }
                    match chars.peek() {
                        Some(&(_, '<')) => {
                            chars.next();
                            let mut iri = String::new();
                            loop {
                                match chars.next() {
                                    Some((_, '>')) => break,
                                    Some((_, ch)) => iri.push(ch),
                                    None => return Err(unsupported("unterminated datatype IRI")),
                                }
                            }
                            datatype = Some(iri);
                        }
                        _ => {
                            let mut name = String::new();
                            while let Some(&(_, ch)) = chars.peek() {
                                if ch.is_ascii_alphanumeric() || ch == '_' || ch == ':' || ch == '-'
                                {
                                    name.push(ch);
                                    chars.next();
                                } else {
                                    break;
                                }
                            }
                            datatype = Some(name);
                        }
                    }
                }
                toks.push(Tok::Literal(Literal {
                    lexical,
                    language,
                    datatype,
                }));
            }
            '{' | '}' | '(' | ')' | ';' | '.' | ',' | '*' => {
                chars.next();
                toks.push(Tok::Punct(c));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while let Some(&(j, ch)) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == ':' || ch == '-' {
                        end = j + ch.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push(Tok::Word(input[start..end].to_string()));
            }
            other => return Err(unsupported(format!("unexpected character {other:?}"))),
        }
    }
    Ok(toks)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
    prefixes: HashMap<String, String>,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat_punct(&mut self, c: char) -> Result<(), StoreError> {
        match self.next() {
            Some(Tok::Punct(p)) if p == c => Ok(()),
            other => Err(unsupported(format!("expected {c:?}, got {other:?}"))),
        }
    }

    fn eat_keyword(&mut self, word: &str) -> Result<(), StoreError> {
        match self.next() {
            Some(Tok::Word(w)) if w.eq_ignore_ascii_case(word) => Ok(()),
            other => Err(unsupported(format!("expected {word}, got {other:?}"))),
        }
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Tok::Word(w)) if w.eq_ignore_ascii_case(word))
    }

    fn expand_pname(&self, name: &str) -> Result<String, StoreError> {
        let (prefix, local) = name
            .split_once(':')
            .ok_or_else(|| unsupported(format!("expected prefixed name, got {name:?}")))?;
        let ns = self
            .prefixes
            .get(prefix)
            .ok_or_else(|| unsupported(format!("undeclared prefix {prefix:?}")))?;
        Ok(format!("{ns}{local}"))
    }

    fn expand_datatype(&self, dt: &str) -> Result<String, StoreError> {
        if dt.contains("://") || !dt.contains(':') {
            Ok(dt.to_string())
        } else {
            self.expand_pname(dt)
        }
    }

    fn parse_prefix_decls(&mut self) -> Result<(), StoreError> {
        while self.at_keyword("PREFIX") {
            self.next();
            let head = match self.next() {
                Some(Tok::Word(w)) if w.ends_with(':') => w,
                other => {
                    return Err(unsupported(format!(
                        "expected `prefix:` after PREFIX, got {other:?}"
                    )))
                }
            };
            let ns = match self.next() {
                Some(Tok::Iri(iri)) => iri,
                other => {
                    return Err(unsupported(format!(
                        "expected namespace IRI, got {other:?}"
                    )))
                }
            };
            self.prefixes
                .insert(head.trim_end_matches(':').to_string(), ns);
        }
        Ok(())
    }

    /// A term in pattern position. `a` expands to rdf:type when
    /// `predicate` is set.
    fn parse_pat_term(&mut self, predicate: bool) -> Result<PatTerm, StoreError> {
        match self.next() {
            Some(Tok::Var(name)) => Ok(PatTerm::Var(name)),
            Some(Tok::Iri(iri)) => Ok(PatTerm::Term(Term::Iri(iri))),
            Some(Tok::Literal(mut literal)) => {
                if let Some(dt) = literal.datatype.take() {
                    literal.datatype = Some(self.expand_datatype(&dt)?);
                }
                Ok(PatTerm::Term(Term::Literal(literal)))
            }
            Some(Tok::Word(w)) if predicate && w == "a" => {
                Ok(PatTerm::Term(Term::Iri(RDF_TYPE_IRI.to_string())))
            }
            Some(Tok::Word(w)) if w.starts_with("_:") => {
                Ok(PatTerm::Term(Term::Blank(w[2..].to_string())))
            }
            Some(Tok::Word(w)) if w.contains(':') => {
                Ok(PatTerm::Term(Term::Iri(self.expand_pname(&w)?)))
            }
            other => Err(unsupported(format!("unexpected term {other:?}"))),
        }
    }

    fn parse_triple_pattern(&mut self) -> Result<TriplePattern, StoreError> {
        let subject = self.parse_pat_term(false)?;
        let predicate = self.parse_pat_term(true)?;
        let object = self.parse_pat_term(false)?;
        // Trailing '.' is conventional; tolerate its absence before '}'.
        if matches!(self.peek(), Some(Tok::Punct('.'))) {
            self.next();
        }
        Ok(TriplePattern {
            subject,
            predicate,
            object,
        })
    }

    fn parse_group(&mut self) -> Result<Vec<PatternItem>, StoreError> {
        self.eat_punct('{')?;
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(Tok::Punct('}')) => {
                    self.next();
                    break;
                }
                Some(Tok::Word(w)) if w.eq_ignore_ascii_case("OPTIONAL") => {
                    self.next();
                    items.push(PatternItem::Optional(self.parse_group()?));
                }
                Some(_) => items.push(PatternItem::Triple(self.parse_triple_pattern()?)),
                None => return Err(unsupported("unterminated group pattern")),
            }
        }
        Ok(items)
    }

    fn parse_select(&mut self) -> Result<ParsedOp, StoreError> {
        self.eat_keyword("SELECT")?;
        let distinct = if self.at_keyword("DISTINCT") {
            self.next();
            true
        } else {
            false
        };

        let count = match self.peek() {
            Some(Tok::Punct('*')) => {
                self.next();
                None
            }
            Some(Tok::Punct('(')) => {
                self.next();
                self.eat_keyword("COUNT")?;
                self.eat_punct('(')?;
                self.eat_punct('*')?;
                self.eat_punct(')')?;
                self.eat_keyword("AS")?;
                let var = match self.next() {
                    Some(Tok::Var(name)) => name,
                    other => {
                        return Err(unsupported(format!(
                            "expected variable after AS, got {other:?}"
                        )))
                    }
                };
                self.eat_punct(')')?;
                Some(var)
            }
            other => {
                return Err(unsupported(format!(
                    "only `*` and COUNT(*) projections are supported, got {other:?}"
                )))
            }
        };

        self.eat_keyword("WHERE")?;
        let pattern = self.parse_group()?;
        Ok(ParsedOp::Select {
            distinct,
            count,
            pattern,
        })
    }

    fn parse_delete_where(&mut self) -> Result<ParsedOp, StoreError> {
        self.eat_keyword("DELETE")?;
        self.eat_keyword("WHERE")?;
        self.eat_punct('{')?;
        let mut pattern = Vec::new();
        loop {
            match self.peek() {
                Some(Tok::Punct('}')) => {
                    self.next();
                    break;
                }
                Some(_) => pattern.push(self.parse_triple_pattern()?),
                None => return Err(unsupported("unterminated DELETE WHERE pattern")),
            }
        }
        Ok(ParsedOp::DeleteWhere { pattern })
    }

    /// Subject-grouped triples: `s p o ; p2 o2 . s2 ...` with `a` sugar.
    fn parse_insert_data(&mut self) -> Result<ParsedOp, StoreError> {
        self.eat_keyword("INSERT")?;
        self.eat_keyword("DATA")?;
        self.eat_punct('{')?;
        let mut triples = Vec::new();
        loop {
            if matches!(self.peek(), Some(Tok::Punct('}'))) {
                self.next();
                break;
            }
            let subject = match self.parse_pat_term(false)? {
                PatTerm::Term(t) => t,
                PatTerm::Var(v) => {
                    return Err(unsupported(format!("variable ?{v} in INSERT DATA")))
                }
            };
            loop {
                let predicate = match self.parse_pat_term(true)? {
                    PatTerm::Term(Term::Iri(iri)) => iri,
                    other => {
                        return Err(unsupported(format!(
                            "predicate must be an IRI, got {other:?}"
                        )))
                    }
                };
                let object = match self.parse_pat_term(false)? {
                    PatTerm::Term(t) => t,
                    PatTerm::Var(v) => {
                        return Err(unsupported(format!("variable ?{v} in INSERT DATA")))
                    }
                };
                triples.push(Triple::new(subject.clone(), predicate, object));
                match self.next() {
                    Some(Tok::Punct(';')) => continue,
                    Some(Tok::Punct('.')) => break,
                    Some(Tok::Punct('}')) => {
                        // Tolerate a missing final '.'.
                        self.pos -= 1;
                        break;
                    }
                    other => {
                        return Err(unsupported(format!(
                            "expected ';' or '.' in INSERT DATA, got {other:?}"
                        )))
                    }
                }
            }
        }
        Ok(ParsedOp::InsertData { triples })
    }
}

/// Parse a full program: prefix declarations plus one or more operations
/// separated by `;`.
pub fn parse_operations(text: &str) -> Result<Vec<ParsedOp>, StoreError> {
    let toks = tokenize(text)?;
    let mut parser = Parser {
        toks,
        pos: 0,
        prefixes: HashMap::new(),
    };
    let mut ops = Vec::new();
    loop {
        parser.parse_prefix_decls()?;
        match parser.peek() {
            None => break,
            Some(Tok::Word(w)) if w.eq_ignore_ascii_case("SELECT") => {
                ops.push(parser.parse_select()?)
            }
            Some(Tok::Word(w)) if w.eq_ignore_ascii_case("DELETE") => {
                ops.push(parser.parse_delete_where()?)
            }
            Some(Tok::Word(w)) if w.eq_ignore_ascii_case("INSERT") => {
                ops.push(parser.parse_insert_data()?)
            }
            other => return Err(unsupported(format!("unexpected token {other:?}"))),
        }
        if matches!(parser.peek(), Some(Tok::Punct(';'))) {
            parser.next();
        }
    }
    if ops.is_empty() {
        return Err(unsupported("empty program"));
    }
    Ok(ops)
}
