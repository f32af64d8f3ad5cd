//! scanner.rs — Analyse lexicale du langage Saumon.
//!
//! Producteur de flux : `Scanner::new(source)` puis `scan_token()` jusqu’à
//! `Eof`. Aucune allocation : chaque token est une tranche de la source
//! (sauf les tokens d’erreur, dont le lexème EST le message).
//!
//! - espaces, `// …` et `/* … */` (non imbriqués) sont sautés ;
//! - identifiants `[A-Za-z_][A-Za-z0-9_]*`, mots-clés via un trie enraciné
//!   sur le premier caractère ;
//! - nombres `\d+(\.\d+)?` ;
//! - chaînes `"…"` SANS échappes ; un saut de ligne interne incrémente le
//!   compteur de lignes ;
//! - chaîne non terminée ou caractère inconnu → token `Error`.

/// Espèce de token — les mots-clés ont chacun la leur pour brancher vite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Ponctuation simple
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,
    // Un ou deux caractères
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    // Littéraux
    Identifier,
    Str,
    Number,
    // Mots-clés
    And,
    Class,
    Else,
    False,
    For,
    Fun,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    Var,
    While,
    // Spéciaux
    Error,
    Eof,
}

/// Un token : espèce + tranche source + ligne. Pour `Error`, `lexeme` porte
/// le message.
#[derive(Debug, Clone, Copy)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: u32,
}

pub struct Scanner<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line: u32,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Self { source, start: 0, current: 0, line: 1 }
    }

    /// Le prochain token (espaces et commentaires déjà sautés).
    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();
        if is_alpha(c) {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            return self.number();
        }

        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b';' => self.make_token(TokenKind::Semicolon),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b'-' => self.make_token(TokenKind::Minus),
            b'+' => self.make_token(TokenKind::Plus),
            b'/' => self.make_token(TokenKind::Slash),
            b'*' => self.make_token(TokenKind::Star),
            b'!' => {
                let kind = if self.matches(b'=') { TokenKind::BangEqual } else { TokenKind::Bang };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.matches(b'=') { TokenKind::EqualEqual } else { TokenKind::Equal };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.matches(b'=') { TokenKind::LessEqual } else { TokenKind::Less };
                self.make_token(kind)
            }
            b'>' => {
                let kind =
                    if self.matches(b'=') { TokenKind::GreaterEqual } else { TokenKind::Greater };
                self.make_token(kind)
            }
            b'"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }

    /* ────── briques ────── */

    #[inline]
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    #[inline]
    fn advance(&mut self) -> u8 {
        let byte = self.source.as_bytes()[self.current];
        self.current += 1;
        byte
    }

    #[inline]
    fn peek(&self) -> u8 {
        *self.source.as_bytes().get(self.current).unwrap_or(&0)
    }

    #[inline]
    fn peek_next(&self) -> u8 {
        *self.source.as_bytes().get(self.current + 1).unwrap_or(&0)
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.peek() != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        Token { kind, lexeme: &self.source[self.start..self.current], line: self.line }
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token { kind: TokenKind::Error, lexeme: message, line: self.line }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' => {
                    self.current += 1;
                }
                b'\n' => {
                    self.line += 1;
                    self.current += 1;
                }
                b'/' => {
                    if self.peek_next() == b'/' {
                        while self.peek() != b'\n' && !self.is_at_end() {
                            self.current += 1;
                        }
                    } else if self.peek_next() == b'*' {
                        self.current += 2;
                        while self.peek() != b'*' || self.peek_next() != b'/' {
                            if self.peek() == b'\n' {
                                self.line += 1;
                            }
                            if self.is_at_end() {
                                return;
                            }
                            self.current += 1;
                        }
                        self.current += 2;
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /* ────── littéraux ────── */

    fn string(&mut self) -> Token<'src> {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.current += 1;
        }
        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }
        self.current += 1; // guillemet fermant
        self.make_token(TokenKind::Str)
    }

    fn number(&mut self) -> Token<'src> {
        while self.peek().is_ascii_digit() {
            self.current += 1;
        }
        // partie fractionnaire seulement si un chiffre suit le point
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.current += 1;
            while self.peek().is_ascii_digit() {
                self.current += 1;
            }
        }
        self.make_token(TokenKind::Number)
    }

    fn identifier(&mut self) -> Token<'src> {
        while is_alpha(self.peek()) || self.peek().is_ascii_digit() {
            self.current += 1;
        }
        self.make_token(self.identifier_kind())
    }

    /// Trie des mots-clés, enraciné sur le premier caractère.
    fn identifier_kind(&self) -> TokenKind {
        let word = &self.source.as_bytes()[self.start..self.current];
        match word[0] {
            b'a' => self.check_keyword(1, b"nd", TokenKind::And),
            b'c' => self.check_keyword(1, b"lass", TokenKind::Class),
            b'e' => self.check_keyword(1, b"lse", TokenKind::Else),
            b'f' if word.len() > 1 => match word[1] {
                b'a' => self.check_keyword(2, b"lse", TokenKind::False),
                b'o' => self.check_keyword(2, b"r", TokenKind::For),
                b'u' => self.check_keyword(2, b"n", TokenKind::Fun),
                _ => TokenKind::Identifier,
            },
            b'i' => self.check_keyword(1, b"f", TokenKind::If),
            b'n' => self.check_keyword(1, b"il", TokenKind::Nil),
            b'o' => self.check_keyword(1, b"r", TokenKind::Or),
            b'p' => self.check_keyword(1, b"rint", TokenKind::Print),
            b'r' => self.check_keyword(1, b"eturn", TokenKind::Return),
            b's' => self.check_keyword(1, b"uper", TokenKind::Super),
            b't' if word.len() > 1 => match word[1] {
                b'h' => self.check_keyword(2, b"is", TokenKind::This),
                b'r' => self.check_keyword(2, b"ue", TokenKind::True),
                _ => TokenKind::Identifier,
            },
            b'v' => self.check_keyword(1, b"ar", TokenKind::Var),
            b'w' => self.check_keyword(1, b"hile", TokenKind::While),
            _ => TokenKind::Identifier,
        }
    }

    fn check_keyword(&self, from: usize, rest: &[u8], kind: TokenKind) -> TokenKind {
        let word = &self.source.as_bytes()[self.start..self.current];
        if &word[from.min(word.len())..] == rest {
            kind
        } else {
            TokenKind::Identifier
        }
    }
}

#[inline]
fn is_alpha(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut out = Vec::new();
        loop {
            let t = scanner.scan_token();
            let done = t.kind == TokenKind::Eof;
            out.push(t.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn punctuation_and_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds("(){};,.-+/* ! != = == < <= > >="),
            vec![
                LeftParen, RightParen, LeftBrace, RightBrace, Semicolon, Comma, Dot, Minus,
                Plus, Slash, Star, Bang, BangEqual, Equal, EqualEqual, Less, LessEqual,
                Greater, GreaterEqual, Eof
            ]
        );
    }

    #[test]
    fn keywords_versus_identifiers() {
        use TokenKind::*;
        assert_eq!(
            kinds("and class else false for fun if nil or print return super this true var while"),
            vec![
                And, Class, Else, False, For, Fun, If, Nil, Or, Print, Return, Super, This,
                True, Var, While, Eof
            ]
        );
        // préfixes et extensions restent des identifiants
        assert_eq!(kinds("an fals classe f t superb"), vec![Identifier; 6].into_iter().chain([Eof]).collect::<Vec<_>>());
    }

    #[test]
    fn numbers_and_the_dot() {
        use TokenKind::*;
        assert_eq!(kinds("123 45.67"), vec![Number, Number, Eof]);
        // "12." : le point sans chiffre derrière reste un Dot
        assert_eq!(kinds("12."), vec![Number, Dot, Eof]);
    }

    #[test]
    fn strings_count_their_newlines() {
        let mut s = Scanner::new("\"a\nb\" x");
        let t = s.scan_token();
        assert_eq!(t.kind, TokenKind::Str);
        assert_eq!(t.lexeme, "\"a\nb\"");
        assert_eq!(t.line, 2); // ligne du guillemet fermant
        assert_eq!(s.scan_token().line, 2);
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let mut s = Scanner::new("\"jamais fermée");
        let t = s.scan_token();
        assert_eq!(t.kind, TokenKind::Error);
        assert_eq!(t.lexeme, "Unterminated string.");
    }

    #[test]
    fn unknown_character_is_an_error_token() {
        let mut s = Scanner::new("@");
        let t = s.scan_token();
        assert_eq!(t.kind, TokenKind::Error);
        assert_eq!(t.lexeme, "Unexpected character.");
    }

    #[test]
    fn comments_are_invisible() {
        use TokenKind::*;
        assert_eq!(kinds("a // ligne\nb /* bloc\nsur deux lignes */ c"), vec![Identifier, Identifier, Identifier, Eof]);
        let mut s = Scanner::new("/* bloc */\nx");
        let t = s.scan_token();
        assert_eq!(t.line, 2);
        // bloc jamais fermé : on atteint Eof sans boucler
        assert_eq!(kinds("/* ouvert"), vec![Eof]);
    }
}
