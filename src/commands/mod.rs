pub mod backtest;
pub mod optimize;

/// Split a comma-separated symbol list, dropping blanks
pub fn parse_symbols(s: &str) -> Vec<String> {
    s.split(',')
        .map(|sym| sym.trim().to_uppercase())
        .filter(|sym| !sym.is_empty())
        .collect()
}
