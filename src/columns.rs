/// Normalizes a CSV header into a snake_case column name.
///
/// Apostrophes are dropped, runs of spaces collapse to one, surrounding
/// whitespace is trimmed, the remaining spaces become underscores and the
/// result is lowercased. Applying it twice yields the same value.
pub fn normalize_column(value: &str) -> String {
    let without_apostrophes = value.replace('\'', "");

    let mut collapsed = String::with_capacity(without_apostrophes.len());
    let mut previous_space = false;
    for ch in without_apostrophes.chars() {
        if ch == ' ' {
            if !previous_space {
                collapsed.push(ch);
            }
            previous_space = true;
        } else {
            collapsed.push(ch);
            previous_space = false;
        }
    }

    collapsed.trim().replace(' ', "_").to_lowercase()
}
