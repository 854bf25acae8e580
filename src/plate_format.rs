/// Latin letters that have a Cyrillic lookalike on Russian plates.
/// A, B and C are kept as Latin letters.
const RU_LOOKALIKES: &[(char, char)] = &[
    ('A', 'A'),
    ('B', 'B'),
    ('E', 'Е'),
    ('K', 'К'),
    ('M', 'М'),
    ('H', 'Н'),
    ('O', 'О'),
    ('P', 'Р'),
    ('C', 'C'),
    ('T', 'Т'),
    ('Y', 'У'),
    ('X', 'Х'),
];

/// Display form of a plate. Only for showing to a user; comparisons use
/// the plain uppercased plate.
pub fn format_plate(plate: &str, region: &str) -> String {
    let uppercased = plate.to_uppercase();
    if region != "ru" {
        return uppercased;
    }
    uppercased
        .chars()
        .map(|c| {
            RU_LOOKALIKES
                .iter()
                .find(|(latin, _)| *latin == c)
                .map(|(_, cyrillic)| *cyrillic)
                .unwrap_or(c)
        })
        .collect()
}
