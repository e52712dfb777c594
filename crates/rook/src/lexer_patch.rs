//
// lexer_patch.rs
//
// Token stream patching: wraps a primitive token source and rewrites
// selected token runs before downstream consumers see them. The main
// client is the roxygen merger, which collapses a run of consecutive
// `#'` comment lines into a single doc-comment token.
//

use std::collections::VecDeque;

use tree_sitter::Tree;

/// Coarse token classification over the primitive stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A plain `#` comment line.
    Comment,
    /// A merged run of `#'` roxygen comment lines (produced by patching).
    RoxygenComment,
    /// Whitespace between leaves, synthesized to keep the stream gap-free.
    Whitespace,
    /// Any other leaf token (identifiers, literals, operators, keywords).
    Text,
}

/// One token: a kind plus a byte span over the original text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// A resettable producer of tokens whose spans tile the input text exactly.
pub trait TokenSource {
    /// Rewind to the beginning of the input.
    fn restart(&mut self);
    /// Yield the next token, or `None` at end of input.
    fn next_token(&mut self) -> Option<Token>;
}

/// Token source over the leaves of a tree-sitter tree.
///
/// Inter-leaf gaps (whitespace the grammar does not tokenize) are emitted
/// as `Whitespace` tokens so that the concatenation of all yielded spans
/// reproduces the input span exactly.
pub struct TreeTokenSource<'t> {
    text: &'t str,
    leaves: Vec<(usize, usize, TokenKind)>,
    pos: usize,
    next_leaf: usize,
}

impl<'t> TreeTokenSource<'t> {
    pub fn new(tree: &Tree, text: &'t str) -> Self {
        let mut leaves = Vec::new();
        collect_leaves(tree.root_node(), &mut leaves);
        Self {
            text,
            leaves,
            pos: 0,
            next_leaf: 0,
        }
    }
}

fn collect_leaves(node: tree_sitter::Node<'_>, out: &mut Vec<(usize, usize, TokenKind)>) {
    if node.child_count() == 0 {
        // Zero-width missing nodes carry no text and would break tiling.
        if node.start_byte() < node.end_byte() {
            let kind = if node.kind() == "comment" {
                TokenKind::Comment
            } else {
                TokenKind::Text
            };
            out.push((node.start_byte(), node.end_byte(), kind));
        }
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_leaves(child, out);
    }
}

impl TokenSource for TreeTokenSource<'_> {
    fn restart(&mut self) {
        self.pos = 0;
        self.next_leaf = 0;
    }

    fn next_token(&mut self) -> Option<Token> {
        if let Some(&(start, end, kind)) = self.leaves.get(self.next_leaf) {
            if self.pos < start {
                let tok = Token {
                    kind: TokenKind::Whitespace,
                    start: self.pos,
                    end: start,
                };
                self.pos = start;
                return Some(tok);
            }
            self.next_leaf += 1;
            self.pos = end;
            return Some(Token { kind, start, end });
        }
        if self.pos < self.text.len() {
            let tok = Token {
                kind: TokenKind::Whitespace,
                start: self.pos,
                end: self.text.len(),
            };
            self.pos = self.text.len();
            return Some(tok);
        }
        None
    }
}

/// A patching hook invoked once per token pulled from the underlying source.
///
/// The hook must enqueue the full replacement for the text it consumed: the
/// original token unchanged, or one or more rewritten tokens whose spans
/// cover everything pulled (the token passed in plus any extra tokens the
/// hook drained from `source`).
pub trait TokenPatch {
    fn process(
        &mut self,
        token: Token,
        source: &mut dyn TokenSource,
        text: &str,
        queue: &mut VecDeque<Token>,
    );
}

/// Token rewriting layer: replacement tokens queued by the patch hook are
/// yielded first; otherwise one token is pulled from the underlying source
/// and run through the hook.
pub struct PatchingLexer<'t, S, P> {
    source: S,
    patch: P,
    text: &'t str,
    queue: VecDeque<Token>,
}

impl<'t, S: TokenSource, P: TokenPatch> PatchingLexer<'t, S, P> {
    pub fn new(source: S, patch: P, text: &'t str) -> Self {
        Self {
            source,
            patch,
            text,
            queue: VecDeque::new(),
        }
    }

    pub fn restart(&mut self) {
        self.queue.clear();
        self.source.restart();
    }

    pub fn next_token(&mut self) -> Option<Token> {
        if let Some(tok) = self.queue.pop_front() {
            return Some(tok);
        }
        let tok = self.source.next_token()?;
        self.patch
            .process(tok, &mut self.source, self.text, &mut self.queue);
        // The hook either queued replacements or re-queued the token itself.
        self.queue.pop_front()
    }

    /// Drain the remaining stream into a vector.
    pub fn collect_tokens(&mut self) -> Vec<Token> {
        let mut out = Vec::new();
        while let Some(tok) = self.next_token() {
            out.push(tok);
        }
        out
    }
}

/// Identity patch: every token passes through unchanged.
pub struct NoPatch;

impl TokenPatch for NoPatch {
    fn process(
        &mut self,
        token: Token,
        _source: &mut dyn TokenSource,
        _text: &str,
        queue: &mut VecDeque<Token>,
    ) {
        queue.push_back(token);
    }
}

/// Merges a maximal run of consecutive `#'` comment lines into one
/// `RoxygenComment` token. Lines separated by whitespace containing more
/// than one newline (a blank line) terminate the run.
pub struct RoxygenMerger;

fn is_roxygen(token: Token, text: &str) -> bool {
    token.kind == TokenKind::Comment && token.text(text).starts_with("#'")
}

fn joins_roxygen_lines(token: Token, text: &str) -> bool {
    token.kind == TokenKind::Whitespace
        && token.text(text).bytes().filter(|&b| b == b'\n').count() == 1
}

impl TokenPatch for RoxygenMerger {
    fn process(
        &mut self,
        token: Token,
        source: &mut dyn TokenSource,
        text: &str,
        queue: &mut VecDeque<Token>,
    ) {
        if !is_roxygen(token, text) {
            queue.push_back(token);
            return;
        }
        let start = token.start;
        let mut end = token.end;
        let mut pending_ws: Option<Token> = None;
        loop {
            match source.next_token() {
                Some(ws) if pending_ws.is_none() && joins_roxygen_lines(ws, text) => {
                    pending_ws = Some(ws);
                }
                Some(next) if pending_ws.is_some() && is_roxygen(next, text) => {
                    // Absorb the separator and the continuation line.
                    end = next.end;
                    pending_ws = None;
                }
                other => {
                    queue.push_back(Token {
                        kind: TokenKind::RoxygenComment,
                        start,
                        end,
                    });
                    if let Some(ws) = pending_ws {
                        queue.push_back(ws);
                    }
                    if let Some(tok) = other {
                        queue.push_back(tok);
                    }
                    return;
                }
            }
        }
    }
}
