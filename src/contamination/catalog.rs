use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const BUILTIN_CATALOG_VERSION: &str = "2025.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermCategory {
    Ethnicity,
    Gender,
    Age,
    Hair,
    Eyes,
    Skin,
    Facial,
    Body,
}

impl TermCategory {
    pub const ALL: [TermCategory; 8] = [
        TermCategory::Ethnicity,
        TermCategory::Gender,
        TermCategory::Age,
        TermCategory::Hair,
        TermCategory::Eyes,
        TermCategory::Skin,
        TermCategory::Facial,
        TermCategory::Body,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TermCategory::Ethnicity => "ethnicity",
            TermCategory::Gender => "gender",
            TermCategory::Age => "age",
            TermCategory::Hair => "hair",
            TermCategory::Eyes => "eyes",
            TermCategory::Skin => "skin",
            TermCategory::Facial => "facial",
            TermCategory::Body => "body",
        }
    }
}

impl fmt::Display for TermCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Invalid pattern for category {category}: {source}")]
    InvalidPattern {
        category: TermCategory,
        #[source]
        source: regex::Error,
    },
    #[error("Failed to parse term catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone)]
pub struct TermRule {
    pub category: TermCategory,
    pub pattern: Regex,
}

impl TermRule {
    pub fn new(category: TermCategory, pattern: &str) -> Result<Self, CatalogError> {
        let pattern = Regex::new(pattern)
            .map_err(|source| CatalogError::InvalidPattern { category, source })?;
        Ok(Self { category, pattern })
    }
}

#[derive(Debug, Clone)]
pub struct TermCatalog {
    pub version: String,
    rules: Vec<TermRule>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    rules: Vec<CatalogFileRule>,
}

#[derive(Debug, Deserialize)]
struct CatalogFileRule {
    category: TermCategory,
    pattern: String,
    #[serde(default)]
    case_sensitive: bool,
}

// Patterns are matched case-insensitively unless a file rule opts out.
const BUILTIN_RULES: &[(TermCategory, &str)] = &[
    (
        TermCategory::Ethnicity,
        r"\b(?:east |south |southeast )?(?:asian|african(?:[- ]american)?|caucasian|hispanic|latina|latino|latinx|european|scandinavian|nordic|slavic|mediterranean|middle[- ]eastern|arab|indian|pakistani|korean|japanese|chinese|vietnamese|thai|filipina|filipino|black|white|native american|pacific islander|mixed[- ]race|biracial)\s+(?:woman|women|man|men|girl|girls|boy|boys|lady|ladies|female|male|person|people|model)\b",
    ),
    (
        TermCategory::Ethnicity,
        r"\b(?:asian|african[- ]american|caucasian|hispanic|latina|latino|latinx|middle[- ]eastern|scandinavian|nordic|slavic|mixed[- ]race|biracial|ethnic)\b",
    ),
    (
        TermCategory::Gender,
        r"\b(?:woman|women|man|men|girl|girls|boy|boys|lady|ladies|gentleman|gentlemen|female|male|feminine|masculine|guy|gal)\b",
    ),
    (
        TermCategory::Age,
        r"\b\d{1,3}[- ]?(?:years?[- ]old|yrs?[- ]old|y/?o)\b",
    ),
    (
        TermCategory::Age,
        r"\b(?:in (?:her|his|their) )?(?:early |mid[- ]|late )?(?:20s|30s|40s|50s|60s|70s|twenties|thirties|forties|fifties|sixties|seventies)\b",
    ),
    (
        TermCategory::Age,
        r"\b(?:young|younger|youthful|old|older|elderly|aged|aging|teenage|teenaged|teen|middle[- ]aged|mature|senior)\b",
    ),
    (
        TermCategory::Hair,
        r"\b(?:(?:long|short|medium[- ]length|shoulder[- ]length|waist[- ]length|cropped|curly|straight|wavy|frizzy|thick|thin|fine|messy|sleek|braided|flowing|voluminous|dark|light|blonde?|brown|black|red|auburn|brunette|ginger|gray|grey|silver|white|platinum|golden|copper|chestnut|honey|pink|blue|purple|green|dyed)[\s,-]+){1,4}hair(?:ed)?\b",
    ),
    (
        TermCategory::Hair,
        r"\b(?:blonde|blond|brunette|redhead|ponytail|pigtails|bangs|fringe|braids|dreadlocks|afro|buzz cut|pixie cut|bob cut|updo|bald)\b",
    ),
    (
        TermCategory::Eyes,
        r"\b(?:(?:blue|green|brown|hazel|gray|grey|amber|dark|light|black|violet|bright|big|large|small|almond[- ]shaped|hooded|monolid|deep[- ]set|piercing)[\s,-]+){1,3}eyes?\b",
    ),
    (
        TermCategory::Eyes,
        r"\b(?:blue|green|brown|hazel|gray|grey|amber|dark|bright|wide|almond)[- ]eyed\b",
    ),
    (
        TermCategory::Skin,
        r"\b(?:(?:fair|pale|porcelain|light|medium|olive|tan|tanned|bronzed|dark|deep|brown|ebony|caramel|golden|sun[- ]kissed|freckled|smooth|flawless)[\s,-]+){1,3}(?:skin(?:ned)?|complexion|skin tone)\b",
    ),
    (
        TermCategory::Skin,
        r"\b(?:freckles|freckled|tanned|suntanned|albino)\b",
    ),
    (
        TermCategory::Facial,
        r"\b(?:full|thin|plump|pouty|red) lips\b|\b(?:high|prominent|sharp) cheekbones\b|\b(?:strong|sharp|square|chiseled|defined) jaw(?:line)?\b|\b(?:button|small|pointed|aquiline|roman|upturned) nose\b",
    ),
    (
        TermCategory::Facial,
        r"\b(?:beard|bearded|mustache|moustache|goatee|stubble|sideburns|dimples|double chin|round face|oval face|heart[- ]shaped face|square face)\b",
    ),
    (
        TermCategory::Body,
        r"\b(?:slim|slender|thin|skinny|petite|curvy|curvaceous|athletic|muscular|toned|fit|plus[- ]size|chubby|overweight|stocky|voluptuous|busty|lean|lanky|hourglass|tall|short)\s+(?:body|build|figure|frame|physique|stature)\b",
    ),
    (
        TermCategory::Body,
        r"\b(?:slim|slender|skinny|petite|curvy|curvaceous|athletic|muscular|toned|plus[- ]size|chubby|overweight|stocky|voluptuous|busty|lanky|tall)\b",
    ),
];

static BUILTIN: Lazy<TermCatalog> = Lazy::new(|| {
    let rules = BUILTIN_RULES
        .iter()
        .map(|(category, pattern)| TermRule {
            category: *category,
            pattern: Regex::new(&format!("(?i){pattern}")).expect("valid builtin term pattern"),
        })
        .collect();
    TermCatalog {
        version: BUILTIN_CATALOG_VERSION.to_string(),
        rules,
    }
});

impl TermCatalog {
    pub fn new(version: impl Into<String>, rules: Vec<TermRule>) -> Self {
        Self {
            version: version.into(),
            rules,
        }
    }

    pub fn builtin() -> &'static TermCatalog {
        &BUILTIN
    }

    /// Parses a YAML rules document:
    ///
    /// ```yaml
    /// version: studio-extra-1
    /// rules:
    ///   - category: hair
    ///     pattern: '\bmohawk\b'
    /// ```
    pub fn from_yaml(raw: &str) -> Result<Self, CatalogError> {
        let parsed: CatalogFile = serde_yaml::from_str(raw)?;
        let mut rules = Vec::with_capacity(parsed.rules.len());
        for rule in parsed.rules {
            let pattern = if rule.case_sensitive {
                rule.pattern
            } else {
                format!("(?i){}", rule.pattern)
            };
            rules.push(TermRule::new(rule.category, &pattern)?);
        }
        Ok(Self {
            version: parsed.version.unwrap_or_else(|| "custom".to_string()),
            rules,
        })
    }

    pub fn extend(&mut self, other: TermCatalog) {
        self.version = format!("{}+{}", self.version, other.version);
        self.rules.extend(other.rules);
    }

    pub fn rules(&self) -> &[TermRule] {
        &self.rules
    }

    pub fn categories(&self) -> Vec<TermCategory> {
        let mut categories = self
            .rules
            .iter()
            .map(|rule| rule.category)
            .collect::<Vec<_>>();
        categories.sort();
        categories.dedup();
        categories
    }
}
