//! KEGG module definition parsing.
//!
//! A module definition is a compact algebraic expression over KO identifiers:
//! whitespace separates sequential steps, commas separate alternative
//! catalysts, `+` joins subunits of an enzyme complex, and a `-` prefix marks
//! a dispensable KO or group. A bare `--` stands for a reaction step with no
//! characterized KO.
//!
//! Binding strength, loosest to tightest: space, comma, `+`/`-`.
//!
//! # Example
//! ```
//! use keggprof::parse::parse_definition;
//!
//! let expr = parse_definition("(K00844,K12407) K01810").unwrap();
//! assert_eq!(expr.to_definition(), "(K00844,K12407) K01810");
//! ```

use std::fmt;

use thiserror::Error;

/// Placeholder KO identifier emitted for `--` steps (reactions with no
/// characterized ortholog). Always a member of the optional KO set.
pub const MISSING_KO: &str = "K00000";

/// Errors raised while lexing or parsing a module definition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected character '{0}' at byte {1}")]
    Lex(char, usize),

    #[error("unbalanced parenthesis at byte {0}")]
    UnbalancedParen(usize),

    #[error("unexpected {0} at byte {1}")]
    UnexpectedToken(String, usize),

    #[error("empty group or alternative at byte {0}")]
    EmptyGroup(usize),
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    LParen,
    RParen,
    Comma,
    Space,
    Minus,
    Plus,
    Atom(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Comma => write!(f, "','"),
            Token::Space => write!(f, "space"),
            Token::Minus => write!(f, "'-'"),
            Token::Plus => write!(f, "'+'"),
            Token::Atom(ko) => write!(f, "'{}'", ko),
        }
    }
}

/// Lexes a definition string into a token stream.
///
/// Whitespace runs collapse to a single `Space` token; spaces adjacent to
/// group boundaries and the ends of the string are dropped. An atom is a
/// maximal `K` + digits run. Any other character is a lexical error.
pub fn tokenize(definition: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let mut tokens: Vec<(Token, usize)> = Vec::new();
    let mut chars = definition.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            '(' => {
                chars.next();
                tokens.push((Token::LParen, pos));
            }
            ')' => {
                chars.next();
                if matches!(tokens.last(), Some((Token::Space, _))) {
                    tokens.pop();
                }
                tokens.push((Token::RParen, pos));
            }
            ',' => {
                chars.next();
                tokens.push((Token::Comma, pos));
            }
            '+' => {
                chars.next();
                tokens.push((Token::Plus, pos));
            }
            '-' => {
                chars.next();
                tokens.push((Token::Minus, pos));
            }
            'K' => {
                chars.next();
                let mut ko = String::from("K");
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() {
                        ko.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if ko.len() == 1 {
                    return Err(ParseError::Lex(c, pos));
                }
                tokens.push((Token::Atom(ko), pos));
            }
            c if c.is_whitespace() => {
                chars.next();
                let boundary = matches!(tokens.last(), None | Some((Token::LParen, _)));
                if !boundary && !matches!(tokens.last(), Some((Token::Space, _))) {
                    tokens.push((Token::Space, pos));
                }
            }
            other => return Err(ParseError::Lex(other, pos)),
        }
    }

    if matches!(tokens.last(), Some((Token::Space, _))) {
        tokens.pop();
    }

    Ok(tokens)
}

// ============================================================================
// Expression tree
// ============================================================================

/// A parsed module definition.
///
/// `Seq` and `Alt` are never unary, and an `Alt` never directly nests
/// another `Alt`; unary grouping disappears during parsing. A parenthesized
/// sequence inside a sequence is preserved, since it forms a single step of
/// the outer sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A single KO identifier.
    Atom(String),
    /// A `--` step: a reaction with no characterized KO.
    Missing,
    /// Space-separated steps; all must be traversed in order.
    Seq(Vec<Expr>),
    /// Comma-separated alternatives; any one suffices.
    Alt(Vec<Expr>),
    /// `+`/`-`-joined complex subunits, traversed in order.
    Complex(Vec<Expr>),
    /// A `-`-marked dispensable subtree.
    Optional(Box<Expr>),
}

impl Expr {
    /// Collects every KO under the expression, in leaf order.
    pub fn kos(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_kos(&mut out);
        out
    }

    fn collect_kos<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Atom(ko) => out.push(ko),
            Expr::Missing => out.push(MISSING_KO),
            Expr::Seq(cs) | Expr::Alt(cs) | Expr::Complex(cs) => {
                for c in cs {
                    c.collect_kos(out);
                }
            }
            Expr::Optional(inner) => inner.collect_kos(out),
        }
    }

    /// Collects every KO lying under an optional (`-` or `--`) annotation.
    pub fn optional_kos(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_optional(false, &mut out);
        out
    }

    fn collect_optional<'a>(&'a self, optional: bool, out: &mut Vec<&'a str>) {
        match self {
            Expr::Atom(ko) => {
                if optional {
                    out.push(ko);
                }
            }
            Expr::Missing => out.push(MISSING_KO),
            Expr::Seq(cs) | Expr::Alt(cs) | Expr::Complex(cs) => {
                for c in cs {
                    c.collect_optional(optional, out);
                }
            }
            Expr::Optional(inner) => inner.collect_optional(true, out),
        }
    }

    /// Renders the expression back to a definition string with minimal
    /// parentheses. Canonical KEGG definitions round-trip unchanged.
    pub fn to_definition(&self) -> String {
        let mut out = String::new();
        self.write(&mut out, 0);
        out
    }

    /// Binding strength of the node's top-level combinator.
    fn precedence(&self) -> u8 {
        match self {
            Expr::Seq(_) => 0,
            Expr::Alt(_) => 1,
            Expr::Complex(_) => 2,
            _ => 3,
        }
    }

    fn write(&self, out: &mut String, min_prec: u8) {
        let parens = self.precedence() < min_prec;
        if parens {
            out.push('(');
        }
        match self {
            Expr::Atom(ko) => out.push_str(ko),
            Expr::Missing => out.push_str("--"),
            Expr::Optional(inner) => {
                out.push('-');
                inner.write(out, 3);
            }
            Expr::Seq(cs) => {
                for (i, c) in cs.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    // Parenthesized alternatives per KEGG convention.
                    c.write(out, 2);
                }
            }
            Expr::Alt(cs) => {
                for (i, c) in cs.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    c.write(out, 2);
                }
            }
            Expr::Complex(cs) => {
                for (i, c) in cs.iter().enumerate() {
                    match c {
                        Expr::Optional(inner) if i > 0 => {
                            out.push('-');
                            inner.write(out, 3);
                        }
                        other => {
                            if i > 0 {
                                out.push('+');
                            }
                            other.write(out, 3);
                        }
                    }
                }
            }
        }
        if parens {
            out.push(')');
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Parses a module definition string into an expression tree.
pub fn parse_definition(definition: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(definition)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let expr = parser.parse_seq()?;
    match parser.peek_with_pos() {
        None => Ok(expr),
        Some((Token::RParen, pos)) => Err(ParseError::UnbalancedParen(pos)),
        Some((tok, pos)) => Err(ParseError::UnexpectedToken(tok.to_string(), pos)),
    }
}

struct Parser<'a> {
    tokens: &'a [(Token, usize)],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn peek_with_pos(&self) -> Option<(&'a Token, usize)> {
        self.tokens.get(self.pos).map(|(t, p)| (t, *p))
    }

    fn bump(&mut self) -> Option<(&'a Token, usize)> {
        let item = self.tokens.get(self.pos).map(|(t, p)| (t, *p));
        self.pos += 1;
        item
    }

    /// Byte position for error reporting at the current cursor.
    fn here(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, p)| *p)
            .unwrap_or(0)
    }

    fn parse_seq(&mut self) -> Result<Expr, ParseError> {
        // A parenthesized sub-sequence stays a child of its own: the group is
        // one step of the outer sequence and keeps its own weight share.
        let mut children = Vec::new();
        loop {
            children.push(self.parse_alt()?);
            if matches!(self.peek(), Some(Token::Space)) {
                self.bump();
            } else {
                break;
            }
        }
        Ok(if children.len() == 1 { children.remove(0) } else { Expr::Seq(children) })
    }

    fn parse_alt(&mut self) -> Result<Expr, ParseError> {
        let mut children = Vec::new();
        loop {
            match self.parse_chain()? {
                Expr::Alt(cs) => children.extend(cs),
                other => children.push(other),
            }
            if matches!(self.peek(), Some(Token::Comma)) {
                self.bump();
            } else {
                break;
            }
        }
        Ok(if children.len() == 1 { children.remove(0) } else { Expr::Alt(children) })
    }

    /// A `+`/`-`-joined complex chain. A `-`-attached member is dispensable.
    fn parse_chain(&mut self) -> Result<Expr, ParseError> {
        let mut members = vec![self.parse_unary()?];
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.bump();
                    members.push(self.parse_unary()?);
                }
                Some(Token::Minus) => {
                    self.bump();
                    let inner = self.parse_unary()?;
                    members.push(match inner {
                        Expr::Optional(_) | Expr::Missing => inner,
                        other => Expr::Optional(Box::new(other)),
                    });
                }
                _ => break,
            }
        }
        Ok(if members.len() == 1 { members.remove(0) } else { Expr::Complex(members) })
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            // `--` not followed by an atom or group is the placeholder step.
            if matches!(self.peek_at(1), Some(Token::Minus))
                && !matches!(self.peek_at(2), Some(Token::Atom(_)) | Some(Token::LParen))
            {
                self.bump();
                self.bump();
                return Ok(Expr::Missing);
            }
            self.bump();
            let inner = self.parse_atom_or_group()?;
            return Ok(Expr::Optional(Box::new(inner)));
        }
        self.parse_atom_or_group()
    }

    fn parse_atom_or_group(&mut self) -> Result<Expr, ParseError> {
        let here = self.here();
        match self.bump() {
            Some((Token::Atom(ko), _)) => Ok(Expr::Atom(ko.clone())),
            Some((Token::LParen, open_pos)) => {
                let inner = self.parse_seq()?;
                match self.bump() {
                    Some((Token::RParen, _)) => Ok(inner),
                    _ => Err(ParseError::UnbalancedParen(open_pos)),
                }
            }
            Some((Token::Comma, pos)) | Some((Token::RParen, pos)) => {
                Err(ParseError::EmptyGroup(pos))
            }
            Some((tok, pos)) => Err(ParseError::UnexpectedToken(tok.to_string(), pos)),
            None => Err(ParseError::EmptyGroup(here)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M00001: &str = "(K00844,K12407,K00845,K25026,K00886,K08074,K00918) \
                          (K01810,K06859,K13810,K15916) (K00850,K16370,K21071,K00918) \
                          (K01623,K01624,K11645,K16305,K16306) K01803 \
                          ((K00134,K00150) K00927,K11389) (K01834,K15633,K15634,K15635) \
                          K01689 (K00873,K12406)";

    fn atom(ko: &str) -> Expr {
        Expr::Atom(ko.to_string())
    }

    #[test]
    fn test_tokenize_basic() {
        let tokens = tokenize("(K00001,K00002) K00003").unwrap();
        let kinds: Vec<Token> = tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            kinds,
            vec![
                Token::LParen,
                Token::Atom("K00001".to_string()),
                Token::Comma,
                Token::Atom("K00002".to_string()),
                Token::RParen,
                Token::Space,
                Token::Atom("K00003".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_collapses_whitespace() {
        let tokens = tokenize("  K00001   K00002\t ").unwrap();
        let kinds: Vec<Token> = tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Atom("K00001".to_string()),
                Token::Space,
                Token::Atom("K00002".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_rejects_foreign_characters() {
        assert!(matches!(tokenize("K00001 M00002"), Err(ParseError::Lex('M', 7))));
        assert!(matches!(tokenize("K bad"), Err(ParseError::Lex('K', 0))));
    }

    #[test]
    fn test_parse_sequence() {
        let expr = parse_definition("K00001 K00002").unwrap();
        assert_eq!(expr, Expr::Seq(vec![atom("K00001"), atom("K00002")]));
    }

    #[test]
    fn test_parse_alternation() {
        let expr = parse_definition("K00001,K00002").unwrap();
        assert_eq!(expr, Expr::Alt(vec![atom("K00001"), atom("K00002")]));
    }

    #[test]
    fn test_comma_binds_tighter_than_space() {
        let expr = parse_definition("K00001,K00002 K00003").unwrap();
        assert_eq!(
            expr,
            Expr::Seq(vec![
                Expr::Alt(vec![atom("K00001"), atom("K00002")]),
                atom("K00003"),
            ])
        );
    }

    #[test]
    fn test_redundant_grouping_flattens() {
        assert_eq!(
            parse_definition("((K00001)) K00002").unwrap(),
            parse_definition("K00001 K00002").unwrap()
        );
        assert_eq!(
            parse_definition("(K00001,K00002),K00003").unwrap(),
            Expr::Alt(vec![atom("K00001"), atom("K00002"), atom("K00003")])
        );
    }

    #[test]
    fn test_grouped_sequence_stays_one_step() {
        assert_eq!(
            parse_definition("(K00001 K00002) K00003").unwrap(),
            Expr::Seq(vec![
                Expr::Seq(vec![atom("K00001"), atom("K00002")]),
                atom("K00003"),
            ])
        );
    }

    #[test]
    fn test_complex_chain() {
        let expr = parse_definition("K00164+K00658+K00382").unwrap();
        assert_eq!(
            expr,
            Expr::Complex(vec![atom("K00164"), atom("K00658"), atom("K00382")])
        );
    }

    #[test]
    fn test_dispensable_subunit_suffix() {
        let expr = parse_definition("K00174+K00175-K00177-K00176").unwrap();
        assert_eq!(
            expr,
            Expr::Complex(vec![
                atom("K00174"),
                atom("K00175"),
                Expr::Optional(Box::new(atom("K00177"))),
                Expr::Optional(Box::new(atom("K00176"))),
            ])
        );
        assert_eq!(expr.optional_kos(), vec!["K00177", "K00176"]);
    }

    #[test]
    fn test_optional_prefix_and_group() {
        let expr = parse_definition("K00001 -K00002").unwrap();
        assert_eq!(
            expr,
            Expr::Seq(vec![atom("K00001"), Expr::Optional(Box::new(atom("K00002")))])
        );

        let expr = parse_definition("-(K00001,K00002) K00003").unwrap();
        assert_eq!(expr.optional_kos(), vec!["K00001", "K00002"]);
        assert_eq!(expr.kos(), vec!["K00001", "K00002", "K00003"]);
    }

    #[test]
    fn test_missing_step_placeholder() {
        let expr = parse_definition("K00001 -- K00002").unwrap();
        assert_eq!(expr, Expr::Seq(vec![atom("K00001"), Expr::Missing, atom("K00002")]));
        assert_eq!(expr.optional_kos(), vec![MISSING_KO]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_definition("(K00001"), Err(ParseError::UnbalancedParen(0))));
        assert!(matches!(parse_definition("K00001)"), Err(ParseError::UnbalancedParen(_))));
        assert!(matches!(parse_definition("()"), Err(ParseError::EmptyGroup(_))));
        assert!(matches!(parse_definition("K00001,,K00002"), Err(ParseError::EmptyGroup(_))));
        assert!(matches!(parse_definition(""), Err(ParseError::EmptyGroup(_))));
        assert!(matches!(parse_definition("K00001,"), Err(ParseError::EmptyGroup(_))));
        assert!(matches!(parse_definition("K00001 K2@"), Err(ParseError::Lex('@', _))));
    }

    #[test]
    fn test_roundtrip_canonical_definitions() {
        let canonical = [
            "K00001 K00002",
            "K00001,K00002",
            "(K00001,K00002) K00003",
            "K00164+K00658+K00382",
            "K00174+K00175-K00177-K00176",
            "K00001 -- K00002",
            "K00001 -K00002",
            "-(K00001,K00002) K00003",
            "(K00001 K00002) K00003",
        ];
        for def in canonical {
            let expr = parse_definition(def).unwrap();
            assert_eq!(expr.to_definition(), def, "definition {def:?} did not round-trip");
        }
    }

    #[test]
    fn test_roundtrip_normalizes_redundant_parens() {
        // Outer grouping disappears and unparenthesized alternatives gain
        // their conventional parentheses; re-parsing yields the same tree.
        let expr = parse_definition("((K00134,K00150) K00927,K11389)").unwrap();
        assert_eq!(
            expr,
            Expr::Seq(vec![
                Expr::Alt(vec![atom("K00134"), atom("K00150")]),
                Expr::Alt(vec![atom("K00927"), atom("K11389")]),
            ])
        );
        assert_eq!(expr.to_definition(), "(K00134,K00150) (K00927,K11389)");
        assert_eq!(parse_definition(&expr.to_definition()).unwrap(), expr);
    }

    #[test]
    fn test_roundtrip_m00001() {
        let expr = parse_definition(M00001).unwrap();
        // One alternative pair is written without its redundant parentheses
        // in the canonical string; everything else round-trips byte for
        // byte, and re-parsing the rendering is always a fixed point.
        let rendered = expr.to_definition();
        assert_eq!(parse_definition(&rendered).unwrap(), expr);
        assert_eq!(rendered, M00001.replace("K00927,K11389", "(K00927,K11389)"));
    }

    #[test]
    fn test_kos_in_leaf_order() {
        let expr = parse_definition("(K00002,K00001) K00003").unwrap();
        assert_eq!(expr.kos(), vec!["K00002", "K00001", "K00003"]);
    }
}
