use unaccent::unaccent;

use crate::ports::transliterate::Transliterator;

/// Russian Cyrillic to Latin, using the reversed Russian table.
///
/// Anything outside the table passes through, then an `unaccent` pass folds
/// accented Latin letters to plain ASCII.
#[derive(Debug, Clone, Copy, Default)]
pub struct RussianLatinTransliterator;

fn latin_for(c: char) -> Option<&'static str> {
    let latin = match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' | 'ё' | 'э' => "e",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'й' => "j",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "h",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "sch",
        'ъ' | 'ь' => "",
        'ы' => "y",
        'ю' => "ju",
        'я' => "ja",
        _ => return None,
    };
    Some(latin)
}

impl Transliterator for RussianLatinTransliterator {
    fn transliterate(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            let lower = c.to_lowercase().next().unwrap_or(c);
            match latin_for(lower) {
                Some(latin) if lower != c => {
                    // Capitalize only the first letter: Ж -> Zh
                    let mut chars = latin.chars();
                    if let Some(first) = chars.next() {
                        out.extend(first.to_uppercase());
                        out.push_str(chars.as_str());
                    }
                }
                Some(latin) => out.push_str(latin),
                None => out.push(c),
            }
        }
        unaccent(&out)
    }
}
