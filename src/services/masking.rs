/// Number of trailing digits left visible in a masked identity number.
const VISIBLE_DIGITS: usize = 4;

/// Redacts an identity number down to its last four digits.
///
/// Separators and any other non-digit characters are dropped, and every
/// digit except the last four becomes `*`. A value with four or fewer
/// digits comes back unmasked.
///
/// Apply this once to the raw device value: masked output contains no
/// digits to preserve except the visible tail, so masking it again hides
/// those too.
///
/// # Examples
///
/// ```
/// use eid_agent::services::masking::mask_id_number;
///
/// assert_eq!(mask_id_number("784-1988-1234567-1"), "***********5671");
/// ```
pub fn mask_id_number(raw: &str) -> String {
    let digits: Vec<char> = raw.chars().filter(char::is_ascii_digit).collect();

    // TODO: decide whether identifiers this short should be padded with `*`
    // instead of being returned as-is.
    if digits.len() <= VISIBLE_DIGITS {
        return digits.into_iter().collect();
    }

    let hidden = digits.len() - VISIBLE_DIGITS;
    std::iter::repeat_n('*', hidden)
        .chain(digits[hidden..].iter().copied())
        .collect()
}
