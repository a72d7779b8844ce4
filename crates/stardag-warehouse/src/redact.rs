//! Masking of credential literals in statements before they are logged.

const SECRET_CLAUSES: [&str; 3] = ["ACCESS_KEY_ID", "SECRET_ACCESS_KEY", "SESSION_TOKEN"];

const MASK: &str = "'***'";

/// Return `statement` with the quoted value of every credential clause
/// replaced by `'***'`. Everything else is left as written.
pub fn redact(statement: &str) -> String {
  let upper = statement.to_ascii_uppercase();
  let mut out = String::with_capacity(statement.len());
  let mut pos = 0;

  while let Some((start, keyword)) = next_clause(&upper, pos) {
    let after = start + keyword.len();
    let rest = &statement[after..];
    let literal = after + (rest.len() - rest.trim_start().len());

    if !statement[literal..].starts_with('\'') {
      out.push_str(&statement[pos..after]);
      pos = after;
      continue;
    }

    out.push_str(&statement[pos..literal]);
    out.push_str(MASK);
    pos = closing_quote(statement, literal);
  }

  out.push_str(&statement[pos..]);
  out
}

fn next_clause(upper: &str, from: usize) -> Option<(usize, &'static str)> {
  SECRET_CLAUSES
    .iter()
    .filter_map(|keyword| upper[from..].find(keyword).map(|i| (from + i, *keyword)))
    .min_by_key(|(i, _)| *i)
}

/// Index just past the literal opened at `open`. Doubled quotes are escapes.
fn closing_quote(statement: &str, open: usize) -> usize {
  let bytes = statement.as_bytes();
  let mut i = open + 1;
  while i < bytes.len() {
    if bytes[i] == b'\'' {
      if bytes.get(i + 1) == Some(&b'\'') {
        i += 2;
        continue;
      }
      return i + 1;
    }
    i += 1;
  }
  bytes.len()
}
