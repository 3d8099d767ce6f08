//! Country name lookup used when splitting affiliation strings

/// Lowercase country names and common short forms
const COUNTRY_NAMES: &[&str] = &[
    "afghanistan", "albania", "algeria", "andorra", "angola", "argentina", "armenia",
    "australia", "austria", "azerbaijan", "bahamas", "bahrain", "bangladesh", "barbados",
    "belarus", "belgium", "belize", "benin", "bhutan", "bolivia", "bosnia and herzegovina",
    "botswana", "brazil", "brunei", "bulgaria", "burkina faso", "burundi", "cambodia",
    "cameroon", "canada", "chad", "chile", "china", "colombia", "congo", "costa rica",
    "croatia", "cuba", "cyprus", "czech republic", "czechia", "denmark", "djibouti",
    "dominican republic", "ecuador", "egypt", "el salvador", "estonia", "eswatini",
    "ethiopia", "fiji", "finland", "france", "gabon", "gambia", "georgia", "germany",
    "ghana", "greece", "guatemala", "guinea", "guyana", "haiti", "honduras", "hong kong",
    "hungary", "iceland", "india", "indonesia", "iran", "iraq", "ireland", "israel", "italy",
    "ivory coast", "jamaica", "japan", "jordan", "kazakhstan", "kenya", "korea", "kosovo",
    "kuwait", "kyrgyzstan", "laos", "latvia", "lebanon", "lesotho", "liberia", "libya",
    "liechtenstein", "lithuania", "luxembourg", "macau", "madagascar", "malawi", "malaysia",
    "maldives", "mali", "malta", "mauritania", "mauritius", "mexico", "moldova", "monaco",
    "mongolia", "montenegro", "morocco", "mozambique", "myanmar", "namibia", "nepal",
    "netherlands", "the netherlands", "new zealand", "nicaragua", "niger", "nigeria",
    "north korea", "north macedonia", "norway", "oman", "pakistan", "palestine", "panama",
    "papua new guinea", "paraguay", "peru", "philippines", "poland", "portugal",
    "puerto rico", "qatar", "romania", "russia", "russian federation", "rwanda",
    "saudi arabia", "senegal", "serbia", "sierra leone", "singapore", "slovakia",
    "slovenia", "somalia", "south africa", "south korea", "republic of korea",
    "south sudan", "spain", "sri lanka", "sudan", "suriname", "sweden", "switzerland",
    "syria", "taiwan", "tajikistan", "tanzania", "thailand", "togo", "trinidad and tobago",
    "tunisia", "turkey", "türkiye", "turkmenistan", "uganda", "ukraine",
    "united arab emirates", "uae", "united kingdom", "uk", "u.k.", "england", "scotland",
    "wales", "northern ireland", "great britain", "united states", "united states of america",
    "usa", "u.s.a.", "us", "u.s.", "uruguay", "uzbekistan", "venezuela", "vietnam",
    "viet nam", "yemen", "zambia", "zimbabwe",
];

/// True when `text` is nothing but a country name
pub fn is_country(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches('.')
        .trim()
        .to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    COUNTRY_NAMES
        .iter()
        .any(|name| name.trim_end_matches('.') == normalized)
}

/// Split on `delimiter`, folding a trailing country segment into the one before it
///
/// `"Tsinghua University, Beijing, China"` splits into
/// `["Tsinghua University", "Beijing, China"]`.
pub fn split_country_aware(text: &str, delimiter: &str) -> Vec<String> {
    let mut segments: Vec<String> = Vec::new();
    for part in text.split(delimiter).map(str::trim).filter(|p| !p.is_empty()) {
        match segments.last_mut() {
            Some(previous) if is_country(part) => {
                previous.push_str(", ");
                previous.push_str(part);
            }
            _ => segments.push(part.to_string()),
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_country() {
        assert!(is_country("USA"));
        assert!(is_country(" United Kingdom "));
        assert!(is_country("U.S."));
        assert!(!is_country("Yale University"));
        assert!(!is_country(""));
    }

    #[test]
    fn test_split_country_aware() {
        assert_eq!(
            split_country_aware("Tsinghua University, Beijing, China", ","),
            vec!["Tsinghua University", "Beijing, China"]
        );
        assert_eq!(split_country_aware("China", ","), vec!["China"]);
        assert_eq!(
            split_country_aware("MIT,, Cambridge", ","),
            vec!["MIT", "Cambridge"]
        );
    }
}
