//! Recursive-descent parser for the DML subset the router understands.
//!
//! It does not validate SQL: anything it does not need for routing or
//! rewriting is skipped with paren-depth tracking and left for the backend
//! to accept or reject.

use shardline_common::error::SqlError;
use shardline_common::types::StatementKind;
use shardline_common::value::Value;

use crate::lexer::{tokenize, Token, TokenKind};
use crate::statement::{
    AssignmentSegment, ColumnSegment, Condition, Conditions, ExprKind, ExprSegment, InsertClause,
    InsertValues, OrderByItem, SetAssignmentsSegment, SqlStatement, TableSegment,
};

/// Words that end a table reference and therefore can never be an alias.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "NATURAL", "ON", "USING",
    "GROUP", "ORDER", "LIMIT", "OFFSET", "HAVING", "SET", "VALUES", "VALUE", "UNION", "FOR",
    "LOCK", "WINDOW",
];

const JOIN_KEYWORDS: &[&str] = &["JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL"];

const SELECT_TAIL_KEYWORDS: &[&str] = &["GROUP", "ORDER", "LIMIT", "HAVING", "FOR", "UNION", "LOCK", "WINDOW"];

const UPDATE_TAIL_KEYWORDS: &[&str] = &["ORDER", "LIMIT"];

/// Parse one SQL statement.
pub fn parse(sql: &str) -> Result<SqlStatement, SqlError> {
    let (tokens, _) = tokenize(sql)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        aliases: Vec::new(),
    };
    let mut statement = parser.parse_statement(sql.len())?;
    statement.placeholders = tokens
        .iter()
        .filter(|t| matches!(t.kind, TokenKind::Placeholder(_)))
        .map(|t| t.start)
        .collect();
    statement.column_owners = column_owners(&tokens, &statement.tables, &parser.aliases);
    statement.sql = sql.to_string();
    Ok(statement)
}

/// Qualifiers of `qualifier.column` references that name a table of the
/// statement directly. Table names written as `owner.table` are not column
/// references and are skipped.
fn column_owners(
    tokens: &[Token],
    tables: &[TableSegment],
    aliases: &[(String, String)],
) -> Vec<TableSegment> {
    let mut owners = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        let Some(qualifier) = token.ident() else {
            continue;
        };
        let qualifies_column = tokens.get(i + 1).is_some_and(|t| t.is_symbol('.'))
            && tokens
                .get(i + 2)
                .is_some_and(|t| t.ident().is_some() || t.is_symbol('*'))
            && !tokens
                .get(i + 3)
                .is_some_and(|t| t.is_symbol('.') || t.is_symbol('('));
        if !qualifies_column {
            continue;
        }
        let member_start = tokens[i + 2].start;
        if tables.iter().any(|t| t.start == member_start) {
            continue;
        }
        if aliases.iter().any(|(alias, _)| alias.eq_ignore_ascii_case(qualifier)) {
            continue;
        }
        if let Some(table) = tables.iter().find(|t| t.name.eq_ignore_ascii_case(qualifier)) {
            owners.push(TableSegment {
                name: table.name.clone(),
                alias: None,
                start: token.start,
                stop: token.stop(),
            });
        }
    }
    owners
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    /// (alias, table) pairs seen so far.
    aliases: Vec<(String, String)>,
}

impl<'a> Parser<'a> {
    fn parse_statement(&mut self, sql_len: usize) -> Result<SqlStatement, SqlError> {
        let first = self.peek().ok_or_else(|| SqlError::Parse {
            position: sql_len,
            message: "empty statement".into(),
        })?;

        let kind = match &first.kind {
            TokenKind::Word(w) if w.eq_ignore_ascii_case("SELECT") => StatementKind::Select,
            TokenKind::Word(w) if w.eq_ignore_ascii_case("INSERT") => StatementKind::Insert,
            TokenKind::Word(w) if w.eq_ignore_ascii_case("UPDATE") => StatementKind::Update,
            TokenKind::Word(w) if w.eq_ignore_ascii_case("DELETE") => StatementKind::Delete,
            _ => StatementKind::Other,
        };

        let mut statement = SqlStatement {
            sql: String::new(),
            kind,
            tables: Vec::new(),
            column_owners: Vec::new(),
            conditions: Conditions::Usable(Vec::new()),
            insert: None,
            order_by: Vec::new(),
            placeholders: Vec::new(),
        };

        match kind {
            StatementKind::Select => self.parse_select(&mut statement)?,
            StatementKind::Insert => self.parse_insert(&mut statement)?,
            StatementKind::Update => self.parse_update(&mut statement)?,
            StatementKind::Delete => self.parse_delete(&mut statement)?,
            StatementKind::Other => {}
        }
        Ok(statement)
    }

    // ── SELECT ──

    fn parse_select(&mut self, stmt: &mut SqlStatement) -> Result<(), SqlError> {
        self.advance();
        if !self.skip_to_keywords(&["FROM"]) {
            return Ok(());
        }
        self.advance();

        loop {
            if self.peek().is_some_and(|t| t.is_symbol('(')) {
                return Err(SqlError::Unsupported("derived table in FROM".into()));
            }
            stmt.tables.push(self.parse_table_ref()?);

            if self.eat_keyword("ON") {
                let mut stops = JOIN_KEYWORDS.to_vec();
                stops.push("WHERE");
                stops.extend_from_slice(SELECT_TAIL_KEYWORDS);
                self.skip_to_keywords_or_comma(&stops);
            } else if self.eat_keyword("USING") {
                self.skip_group()?;
            }

            if self.eat_symbol(',') {
                continue;
            }
            if self.at_any_keyword(JOIN_KEYWORDS) {
                while !self.eat_keyword("JOIN") {
                    if self.peek().is_none() {
                        return Err(self.error("expected JOIN"));
                    }
                    self.advance();
                }
                continue;
            }
            break;
        }

        if self.eat_keyword("WHERE") {
            stmt.conditions = self.parse_conditions(SELECT_TAIL_KEYWORDS)?;
        }

        if self.skip_to_keywords(&["ORDER"]) {
            self.advance();
            self.expect_keyword("BY")?;
            stmt.order_by = self.parse_order_by();
        }
        Ok(())
    }

    /// ORDER BY column list. Returns empty when any item is not a plain
    /// column reference so merges fall back to concatenation.
    fn parse_order_by(&mut self) -> Vec<OrderByItem> {
        let mut items = Vec::new();
        loop {
            let Some((_, column)) = self.parse_column_ref() else {
                return Vec::new();
            };
            let ascending = if self.eat_keyword("DESC") {
                false
            } else {
                self.eat_keyword("ASC");
                true
            };
            items.push(OrderByItem {
                column: column.name,
                ascending,
            });
            if self.eat_symbol(',') {
                continue;
            }
            if self.at_end() || self.at_any_keyword(&["LIMIT", "OFFSET", "FOR", "LOCK"]) {
                return items;
            }
            return Vec::new();
        }
    }

    // ── INSERT ──

    fn parse_insert(&mut self, stmt: &mut SqlStatement) -> Result<(), SqlError> {
        self.advance();
        self.eat_keyword("IGNORE");
        self.eat_keyword("INTO");
        stmt.tables.push(self.parse_table_name()?);

        let mut columns = Vec::new();
        if self.eat_symbol('(') {
            loop {
                columns.push(self.parse_column()?);
                if self.eat_symbol(',') {
                    continue;
                }
                self.expect_symbol(')')?;
                break;
            }
        }

        if self.eat_keyword("VALUES") || self.eat_keyword("VALUE") {
            let mut rows = Vec::new();
            loop {
                self.expect_symbol('(')?;
                let mut row = Vec::new();
                loop {
                    row.push(self.parse_expr(&[])?);
                    if self.eat_symbol(',') {
                        continue;
                    }
                    self.expect_symbol(')')?;
                    break;
                }
                if !columns.is_empty() && row.len() != columns.len() {
                    return Err(self.error(&format!(
                        "INSERT has {} columns but {} values",
                        columns.len(),
                        row.len()
                    )));
                }
                rows.push(row);
                if !self.eat_symbol(',') {
                    break;
                }
            }
            stmt.insert = Some(InsertClause {
                columns,
                values: InsertValues::Values(rows),
            });
        } else if self.eat_keyword("SET") {
            let assignments = self.parse_assignments(&["ON"])?;
            let set = SetAssignmentsSegment {
                start: assignments[0].start,
                stop: assignments[assignments.len() - 1].stop,
                assignments,
            };
            stmt.insert = Some(InsertClause {
                columns: Vec::new(),
                values: InsertValues::Set(set),
            });
        } else if self.at_keyword("SELECT") {
            return Err(SqlError::Unsupported("INSERT ... SELECT".into()));
        } else {
            return Err(self.error("expected VALUES or SET"));
        }
        Ok(())
    }

    /// `col = expr, col = expr ...`; returns at least one assignment.
    fn parse_assignments(&mut self, stops: &[&str]) -> Result<Vec<AssignmentSegment>, SqlError> {
        let mut assignments = Vec::new();
        loop {
            let start = self.peek().map(|t| t.start).unwrap_or_default();
            let (_, column) = self
                .parse_column_ref()
                .ok_or_else(|| self.error("expected column name in assignment"))?;
            if !self.peek().is_some_and(|t| t.is_op("=")) {
                return Err(self.error("expected '=' in assignment"));
            }
            self.advance();
            let value = self.parse_expr(stops)?;
            assignments.push(AssignmentSegment {
                start,
                stop: value.stop,
                column,
                value,
            });
            if !self.eat_symbol(',') {
                return Ok(assignments);
            }
        }
    }

    // ── UPDATE / DELETE ──

    fn parse_update(&mut self, stmt: &mut SqlStatement) -> Result<(), SqlError> {
        self.advance();
        self.eat_keyword("IGNORE");
        stmt.tables.push(self.parse_table_ref()?);
        self.expect_keyword("SET")?;
        let mut stops = vec!["WHERE"];
        stops.extend_from_slice(UPDATE_TAIL_KEYWORDS);
        self.parse_assignments(&stops)?;
        if self.eat_keyword("WHERE") {
            stmt.conditions = self.parse_conditions(UPDATE_TAIL_KEYWORDS)?;
        }
        Ok(())
    }

    fn parse_delete(&mut self, stmt: &mut SqlStatement) -> Result<(), SqlError> {
        self.advance();
        self.eat_keyword("FROM");
        stmt.tables.push(self.parse_table_ref()?);
        if self.eat_keyword("WHERE") {
            stmt.conditions = self.parse_conditions(UPDATE_TAIL_KEYWORDS)?;
        }
        Ok(())
    }

    // ── WHERE ──

    /// Parse an AND-chain. Predicates that are not `col = v` / `col IN (...)`
    /// are skipped; dropping a conjunct only widens the route.
    fn parse_conditions(&mut self, stops: &[&str]) -> Result<Conditions, SqlError> {
        let mut conditions = Vec::new();
        let mut usable = true;
        loop {
            if self.at_end() || self.at_any_keyword(stops) {
                break;
            }
            let checkpoint = self.pos;
            match self.try_simple_predicate(stops) {
                Some(c) => conditions.push(c),
                None => self.pos = checkpoint,
            }
            match self.skip_predicate(stops)? {
                Connector::And => {}
                Connector::Or => usable = false,
                Connector::End => break,
            }
        }
        Ok(if usable {
            Conditions::Usable(conditions)
        } else {
            Conditions::Unusable
        })
    }

    fn try_simple_predicate(&mut self, stops: &[&str]) -> Option<Condition> {
        let (qualifier, column) = self.parse_column_ref()?;
        let values = if self.peek()?.is_op("=") {
            self.advance();
            vec![self.parse_simple_value()?]
        } else if self.eat_keyword("IN") {
            if !self.eat_symbol('(') {
                return None;
            }
            let mut values = Vec::new();
            loop {
                values.push(self.parse_simple_value()?);
                if self.eat_symbol(',') {
                    continue;
                }
                if !self.eat_symbol(')') {
                    return None;
                }
                break;
            }
            values
        } else {
            return None;
        };

        // Only accept the predicate if nothing follows the value(s) inside it.
        let boundary = match self.peek() {
            None => true,
            Some(t) => {
                t.is_keyword("AND")
                    || t.is_keyword("OR")
                    || t.is_symbol(';')
                    || stops.iter().any(|kw| t.is_keyword(kw))
            }
        };
        if !boundary {
            return None;
        }

        Some(Condition {
            table: qualifier.map(|q| self.resolve_alias(&q)),
            column: column.name,
            values,
        })
    }

    /// Skip to the end of the current predicate and consume its connector.
    fn skip_predicate(&mut self, stops: &[&str]) -> Result<Connector, SqlError> {
        let mut depth = 0usize;
        let mut between_pending = false;
        while let Some(t) = self.peek() {
            if t.is_symbol('(') {
                depth += 1;
            } else if t.is_symbol(')') {
                if depth == 0 {
                    return Err(self.error("unbalanced ')'"));
                }
                depth -= 1;
            } else if depth == 0 {
                if t.is_symbol(';') || stops.iter().any(|kw| t.is_keyword(kw)) {
                    return Ok(Connector::End);
                }
                if t.is_keyword("BETWEEN") {
                    between_pending = true;
                } else if t.is_keyword("AND") {
                    self.advance();
                    if between_pending {
                        between_pending = false;
                        continue;
                    }
                    return Ok(Connector::And);
                } else if t.is_keyword("OR") {
                    self.advance();
                    return Ok(Connector::Or);
                }
            }
            self.advance();
        }
        Ok(Connector::End)
    }

    // ── Segments ──

    /// Table reference with optional alias.
    fn parse_table_ref(&mut self) -> Result<TableSegment, SqlError> {
        let mut table = self.parse_table_name()?;
        let alias = if self.eat_keyword("AS") {
            Some(self.expect_ident()?.0)
        } else {
            match self.peek() {
                Some(t) if t.ident().is_some() && !self.is_clause_keyword(t) => {
                    let name = t.ident().unwrap_or_default().to_string();
                    self.advance();
                    Some(name)
                }
                _ => None,
            }
        };
        if let Some(a) = &alias {
            self.aliases.push((a.clone(), table.name.clone()));
        }
        table.alias = alias;
        Ok(table)
    }

    /// `[owner.]table`; the segment covers only the table identifier.
    fn parse_table_name(&mut self) -> Result<TableSegment, SqlError> {
        let (mut name, mut token) = self.expect_ident()?;
        if self.peek().is_some_and(|t| t.is_symbol('.')) {
            self.advance();
            (name, token) = self.expect_ident()?;
        }
        Ok(TableSegment {
            name,
            alias: None,
            start: token.start,
            stop: token.stop(),
        })
    }

    fn parse_column(&mut self) -> Result<ColumnSegment, SqlError> {
        let (name, token) = self.expect_ident()?;
        Ok(ColumnSegment {
            name,
            start: token.start,
            stop: token.stop(),
        })
    }

    /// `[qualifier.]column`; restores position and returns None on mismatch.
    fn parse_column_ref(&mut self) -> Option<(Option<String>, ColumnSegment)> {
        let checkpoint = self.pos;
        let first = self.peek()?.clone();
        let Some(first_name) = first.ident().filter(|_| !self.is_clause_keyword(&first)) else {
            return None;
        };
        let first_name = first_name.to_string();
        self.advance();

        if self.peek().is_some_and(|t| t.is_symbol('.')) {
            self.advance();
            match self.peek().cloned() {
                Some(t) if t.ident().is_some() => {
                    self.advance();
                    let column = ColumnSegment {
                        name: t.ident().unwrap_or_default().to_string(),
                        start: t.start,
                        stop: t.stop(),
                    };
                    return Some((Some(first_name), column));
                }
                _ => {
                    self.pos = checkpoint;
                    return None;
                }
            }
        }
        if self.peek().is_some_and(|t| t.is_symbol('(')) {
            // function call, not a column
            self.pos = checkpoint;
            return None;
        }
        Some((
            None,
            ColumnSegment {
                name: first_name,
                start: first.start,
                stop: first.stop(),
            },
        ))
    }

    /// Literal or placeholder, consumed only when it is one.
    fn parse_simple_value(&mut self) -> Option<ExprSegment> {
        let t = self.peek()?.clone();
        let (kind, stop) = match &t.kind {
            TokenKind::Placeholder(i) => (ExprKind::Placeholder(*i), t.stop()),
            TokenKind::Number(n) => (ExprKind::Literal(number_value(n, false)?), t.stop()),
            TokenKind::Str(s) => (ExprKind::Literal(Value::Text(s.clone())), t.stop()),
            TokenKind::Word(w) if w.eq_ignore_ascii_case("NULL") => (ExprKind::Literal(Value::Null), t.stop()),
            TokenKind::Word(w) if w.eq_ignore_ascii_case("TRUE") => {
                (ExprKind::Literal(Value::Boolean(true)), t.stop())
            }
            TokenKind::Word(w) if w.eq_ignore_ascii_case("FALSE") => {
                (ExprKind::Literal(Value::Boolean(false)), t.stop())
            }
            TokenKind::Symbol('-') => {
                let next = self.tokens.get(self.pos + 1)?;
                match &next.kind {
                    TokenKind::Number(n) => {
                        self.advance();
                        (ExprKind::Literal(number_value(n, true)?), next.stop())
                    }
                    _ => return None,
                }
            }
            _ => return None,
        };
        self.advance();
        Some(ExprSegment {
            kind,
            start: t.start,
            stop,
        })
    }

    /// One value expression, ending before a depth-0 `,` / `)` / stop keyword.
    fn parse_expr(&mut self, stops: &[&str]) -> Result<ExprSegment, SqlError> {
        let begin = self.pos;
        if let Some(simple) = self.parse_simple_value() {
            if self.at_expr_boundary(stops) {
                return Ok(simple);
            }
            self.pos = begin;
        }

        let start = self.peek().map(|t| t.start).ok_or_else(|| self.error("expected expression"))?;
        let mut depth = 0usize;
        let mut stop = start;
        while let Some(t) = self.peek() {
            if depth == 0 && self.at_expr_boundary(stops) {
                break;
            }
            if t.is_symbol('(') {
                depth += 1;
            } else if t.is_symbol(')') {
                depth -= 1;
            }
            stop = t.stop();
            self.advance();
        }
        if self.pos == begin {
            return Err(self.error("expected expression"));
        }
        Ok(ExprSegment {
            kind: ExprKind::Complex,
            start,
            stop,
        })
    }

    fn at_expr_boundary(&self, stops: &[&str]) -> bool {
        match self.peek() {
            None => true,
            Some(t) => {
                t.is_symbol(',')
                    || t.is_symbol(')')
                    || t.is_symbol(';')
                    || stops.iter().any(|kw| t.is_keyword(kw))
            }
        }
    }

    // ── Token helpers ──

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn at_end(&self) -> bool {
        self.peek().map_or(true, |t| t.is_symbol(';'))
    }

    fn at_keyword(&self, kw: &str) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(kw))
    }

    fn at_any_keyword(&self, kws: &[&str]) -> bool {
        self.peek().is_some_and(|t| kws.iter().any(|kw| t.is_keyword(kw)))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), SqlError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", kw)))
        }
    }

    fn eat_symbol(&mut self, c: char) -> bool {
        if self.peek().is_some_and(|t| t.is_symbol(c)) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, c: char) -> Result<(), SqlError> {
        if self.eat_symbol(c) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, &'a Token), SqlError> {
        match self.peek() {
            Some(t) if t.ident().is_some() && !self.is_clause_keyword(t) => {
                self.advance();
                Ok((t.ident().unwrap_or_default().to_string(), t))
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn is_clause_keyword(&self, t: &Token) -> bool {
        matches!(t.kind, TokenKind::Word(_)) && CLAUSE_KEYWORDS.iter().any(|kw| t.is_keyword(kw))
    }

    /// Advance to the first depth-0 token matching one of `kws`.
    /// Returns false (at end of input) if none is found.
    fn skip_to_keywords(&mut self, kws: &[&str]) -> bool {
        let mut depth = 0usize;
        while let Some(t) = self.peek() {
            if t.is_symbol('(') {
                depth += 1;
            } else if t.is_symbol(')') {
                depth = depth.saturating_sub(1);
            } else if depth == 0 && kws.iter().any(|kw| t.is_keyword(kw)) {
                return true;
            }
            self.advance();
        }
        false
    }

    fn skip_to_keywords_or_comma(&mut self, kws: &[&str]) {
        let mut depth = 0usize;
        while let Some(t) = self.peek() {
            if t.is_symbol('(') {
                depth += 1;
            } else if t.is_symbol(')') {
                depth = depth.saturating_sub(1);
            } else if depth == 0
                && (t.is_symbol(',') || t.is_symbol(';') || kws.iter().any(|kw| t.is_keyword(kw)))
            {
                return;
            }
            self.advance();
        }
    }

    /// Skip a parenthesized group starting at the current `(`.
    fn skip_group(&mut self) -> Result<(), SqlError> {
        self.expect_symbol('(')?;
        let mut depth = 1usize;
        while depth > 0 {
            let t = self.peek().ok_or_else(|| self.error("unbalanced '('"))?;
            if t.is_symbol('(') {
                depth += 1;
            } else if t.is_symbol(')') {
                depth -= 1;
            }
            self.advance();
        }
        Ok(())
    }

    fn resolve_alias(&self, qualifier: &str) -> String {
        self.aliases
            .iter()
            .rev()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(qualifier))
            .map(|(_, table)| table.clone())
            .unwrap_or_else(|| qualifier.to_string())
    }

    fn error(&self, message: &str) -> SqlError {
        let position = self
            .peek()
            .map(|t| t.start)
            .or_else(|| self.tokens.last().map(|t| t.end))
            .unwrap_or(0);
        SqlError::Parse {
            position,
            message: message.to_string(),
        }
    }
}

enum Connector {
    And,
    Or,
    End,
}

fn number_value(text: &str, negative: bool) -> Option<Value> {
    if text.contains('.') {
        let v: f64 = text.parse().ok()?;
        Some(Value::Float64(if negative { -v } else { v }))
    } else {
        let v: i64 = text.parse().ok()?;
        Some(Value::Int64(if negative { -v } else { v }))
    }
}
