//! One code point's property set and the closed token vocabularies it uses.
//!
//! Each vocabulary is a plain enum with an explicit string table, so the
//! mapping between a property value and its token in the data files is
//! spelled out once and checked by the compiler.

use std::fmt;
use std::str::FromStr;

use crate::error::{InstallError, Result};

pub const MAX_CODE_POINT: u32 = 0x10FFFF;

/// Number of fields in the `data` attribute of a definition.
pub const DATA_FIELD_COUNT: usize = 11;

macro_rules! closed_tokens {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $token:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }
        impl $name {
            pub const TABLE: &'static [($name, &'static str)] = &[
                $(($name::$variant, $token)),+
            ];
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $token),+
                }
            }
        }
        impl FromStr for $name {
            type Err = InstallError;
            fn from_str(s: &str) -> Result<Self> {
                Self::TABLE
                    .iter()
                    .find(|(_, token)| *token == s)
                    .map(|(value, _)| *value)
                    .ok_or_else(|| InstallError::parse(
                        format!("unknown {} token '{}'", stringify!($name), s),
                        None,
                    ))
            }
        }
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

closed_tokens!(GeneralCategory {
    UppercaseLetter => "Lu",
    LowercaseLetter => "Ll",
    TitlecaseLetter => "Lt",
    ModifierLetter => "Lm",
    OtherLetter => "Lo",
    NonspacingMark => "Mn",
    SpacingMark => "Mc",
    EnclosingMark => "Me",
    DecimalNumber => "Nd",
    LetterNumber => "Nl",
    OtherNumber => "No",
    ConnectorPunctuation => "Pc",
    DashPunctuation => "Pd",
    OpenPunctuation => "Ps",
    ClosePunctuation => "Pe",
    InitialPunctuation => "Pi",
    FinalPunctuation => "Pf",
    OtherPunctuation => "Po",
    MathSymbol => "Sm",
    CurrencySymbol => "Sc",
    ModifierSymbol => "Sk",
    OtherSymbol => "So",
    SpaceSeparator => "Zs",
    LineSeparator => "Zl",
    ParagraphSeparator => "Zp",
    Control => "Cc",
    Format => "Cf",
    Surrogate => "Cs",
    PrivateUse => "Co",
    Unassigned => "Cn",
});

closed_tokens!(BidiClass {
    LeftToRight => "L",
    RightToLeft => "R",
    ArabicLetter => "AL",
    EuropeanNumber => "EN",
    EuropeanSeparator => "ES",
    EuropeanTerminator => "ET",
    ArabicNumber => "AN",
    CommonSeparator => "CS",
    NonspacingMark => "NSM",
    BoundaryNeutral => "BN",
    ParagraphSeparator => "B",
    SegmentSeparator => "S",
    WhiteSpace => "WS",
    OtherNeutral => "ON",
    LeftToRightEmbedding => "LRE",
    LeftToRightOverride => "LRO",
    RightToLeftEmbedding => "RLE",
    RightToLeftOverride => "RLO",
    PopDirectionalFormat => "PDF",
    LeftToRightIsolate => "LRI",
    RightToLeftIsolate => "RLI",
    FirstStrongIsolate => "FSI",
    PopDirectionalIsolate => "PDI",
});

closed_tokens!(
    /// Formatting tag of a compatibility decomposition, written as `<tag>`.
    CompatibilityTag {
        Font => "font",
        NoBreak => "noBreak",
        Initial => "initial",
        Medial => "medial",
        Final => "final",
        Isolated => "isolated",
        Circle => "circle",
        Super => "super",
        Sub => "sub",
        Vertical => "vertical",
        Wide => "wide",
        Narrow => "narrow",
        Small => "small",
        Square => "square",
        Fraction => "fraction",
        Compat => "compat",
    }
);

closed_tokens!(NumericType {
    None => "",
    Decimal => "Decimal",
    Digit => "Digit",
    Numeric => "Numeric",
});

/// Parses a hex code point as written in the data files (`0041`, `F170`, `10FFFD`).
pub fn parse_code_point(s: &str) -> Result<u32> {
    let s = s.trim();
    // from_str_radix alone would also take a leading '+'
    if s.is_empty() || s.len() > 6 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(InstallError::parse(format!("invalid code point '{s}'"), None));
    }
    let code = u32::from_str_radix(s, 16)
        .map_err(|e| InstallError::parse(format!("invalid code point '{s}': {e}"), None))?;
    if code > MAX_CODE_POINT {
        return Err(InstallError::parse(format!("code point '{s}' is out of range"), None));
    }
    Ok(code)
}

/// Renders a code point as uppercase hex with at least four digits.
pub fn format_code_point(code: u32) -> String {
    format!("{code:04X}")
}

fn parse_optional_code_point(s: &str) -> Result<Option<u32>> {
    if s.trim().is_empty() { Ok(None) } else { parse_code_point(s).map(Some) }
}

fn format_optional_code_point(code: Option<u32>) -> String {
    code.map(format_code_point).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decomposition {
    tag: Option<CompatibilityTag>,
    mapping: Vec<u32>,
}

impl Decomposition {
    pub fn canonical(mapping: Vec<u32>) -> Self {
        Self { tag: None, mapping }
    }
    pub fn compatibility(tag: CompatibilityTag, mapping: Vec<u32>) -> Self {
        Self { tag: Some(tag), mapping }
    }
    pub fn tag(&self) -> Option<CompatibilityTag> {
        self.tag
    }
    pub fn mapping(&self) -> &[u32] {
        &self.mapping
    }
}

impl FromStr for Decomposition {
    type Err = InstallError;
    fn from_str(s: &str) -> Result<Self> {
        let mut rest = s.trim();
        let mut tag = None;
        if let Some(stripped) = rest.strip_prefix('<') {
            let end = stripped
                .find('>')
                .ok_or_else(|| InstallError::parse(format!("unterminated decomposition tag in '{s}'"), None))?;
            tag = Some(stripped[..end].parse::<CompatibilityTag>()?);
            rest = stripped[end + 1..].trim_start();
        }
        let mapping = rest
            .split_whitespace()
            .map(parse_code_point)
            .collect::<Result<Vec<u32>>>()?;
        if mapping.is_empty() {
            return Err(InstallError::parse(format!("empty decomposition '{s}'"), None));
        }
        Ok(Self { tag, mapping })
    }
}

impl fmt::Display for Decomposition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(tag) = self.tag {
            write!(f, "<{tag}> ")?;
        }
        let codes: Vec<String> = self.mapping.iter().map(|c| format_code_point(*c)).collect();
        f.write_str(&codes.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacterRecord {
    code: u32,
    name: String,
    general_category: GeneralCategory,
    combining_class: u8,
    bidi_class: BidiClass,
    decomposition: Option<Decomposition>,
    mirrored: bool,
    numeric_type: NumericType,
    numeric_value: Option<String>,
    upper: Option<u32>,
    lower: Option<u32>,
    title: Option<u32>,
}

impl CharacterRecord {
    /// A private use character with neutral properties, refined with the `with_*` builders.
    pub fn new(code: u32, name: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            general_category: GeneralCategory::PrivateUse,
            combining_class: 0,
            bidi_class: BidiClass::LeftToRight,
            decomposition: None,
            mirrored: false,
            numeric_type: NumericType::None,
            numeric_value: None,
            upper: None,
            lower: None,
            title: None,
        }
    }
    pub fn with_general_category(mut self, category: GeneralCategory) -> Self {
        self.general_category = category;
        self
    }
    pub fn with_combining_class(mut self, class: u8) -> Self {
        self.combining_class = class;
        self
    }
    pub fn with_bidi_class(mut self, class: BidiClass) -> Self {
        self.bidi_class = class;
        self
    }
    pub fn with_decomposition(mut self, decomposition: Decomposition) -> Self {
        self.decomposition = Some(decomposition);
        self
    }
    pub fn with_mirrored(mut self, mirrored: bool) -> Self {
        self.mirrored = mirrored;
        self
    }
    pub fn with_numeric(mut self, numeric_type: NumericType, value: impl Into<String>) -> Self {
        self.numeric_type = numeric_type;
        self.numeric_value = Some(value.into()).filter(|v: &String| !v.is_empty());
        self
    }
    pub fn with_case(mut self, upper: Option<u32>, lower: Option<u32>, title: Option<u32>) -> Self {
        self.upper = upper;
        self.lower = lower;
        self.title = title;
        self
    }

    /// Decodes a definition's `code` and semicolon-joined `data` attribute.
    ///
    /// One trailing field beyond [`DATA_FIELD_COUNT`] is accepted and dropped;
    /// some producers write a terminating semicolon.
    pub fn from_definition(code: &str, data: &str) -> Result<Self> {
        let code = parse_code_point(code)?;
        // a tab or line break would split the override database line
        if data.chars().any(char::is_control) {
            return Err(InstallError::parse(
                format!("definition {} contains a control character", format_code_point(code)),
                None,
            ));
        }
        let mut fields: Vec<&str> = data.split(';').collect();
        if fields.len() == DATA_FIELD_COUNT + 1 {
            fields.pop();
        }
        if fields.len() != DATA_FIELD_COUNT {
            return Err(InstallError::parse(
                format!(
                    "definition {} has {} fields, expected {}",
                    format_code_point(code),
                    fields.len(),
                    DATA_FIELD_COUNT
                ),
                None,
            ));
        }
        let combining_class = if fields[2].trim().is_empty() {
            0
        } else {
            fields[2].trim().parse::<u8>().map_err(|e| {
                InstallError::parse(format!("invalid combining class '{}': {e}", fields[2]), None)
            })?
        };
        let decomposition = if fields[4].trim().is_empty() {
            None
        } else {
            Some(fields[4].parse::<Decomposition>()?)
        };
        let mirrored = match fields[5].trim() {
            "Y" => true,
            "N" | "" => false,
            other => {
                return Err(InstallError::parse(format!("invalid mirrored flag '{other}'"), None));
            }
        };
        let numeric_type = fields[6].trim().parse::<NumericType>()?;
        let numeric_value = Some(fields[7].trim().to_string()).filter(|v| !v.is_empty());
        Ok(Self {
            code,
            name: fields[0].to_string(),
            general_category: fields[1].trim().parse()?,
            combining_class,
            bidi_class: fields[3].trim().parse()?,
            decomposition,
            mirrored,
            numeric_type,
            numeric_value,
            upper: parse_optional_code_point(fields[8])?,
            lower: parse_optional_code_point(fields[9])?,
            title: parse_optional_code_point(fields[10])?,
        })
    }

    /// The `data` attribute of a definition, inverse of [`CharacterRecord::from_definition`].
    pub fn definition_data(&self) -> String {
        [
            self.name.clone(),
            self.general_category.to_string(),
            self.combining_class.to_string(),
            self.bidi_class.to_string(),
            self.decomposition.as_ref().map(|d| d.to_string()).unwrap_or_default(),
            if self.mirrored { "Y" } else { "N" }.to_string(),
            self.numeric_type.to_string(),
            self.numeric_value.clone().unwrap_or_default(),
            format_optional_code_point(self.upper),
            format_optional_code_point(self.lower),
            format_optional_code_point(self.title),
        ]
        .join(";")
    }

    /// One line of the override database, without comment or line terminator.
    ///
    /// Fields: code, name, category, combining class, bidi class, decomposition,
    /// decimal, digit, numeric, mirrored, Unicode 1 name, ISO comment, upper,
    /// lower, title. The numeric type decides which of the three numeric
    /// columns carry the value.
    pub fn to_override_line(&self) -> String {
        let value = self.numeric_value.clone().unwrap_or_default();
        let (decimal, digit, numeric) = match self.numeric_type {
            NumericType::None => (String::new(), String::new(), String::new()),
            NumericType::Decimal => (value.clone(), value.clone(), value),
            NumericType::Digit => (String::new(), value.clone(), value),
            NumericType::Numeric => (String::new(), String::new(), value),
        };
        [
            format_code_point(self.code),
            self.name.clone(),
            self.general_category.to_string(),
            self.combining_class.to_string(),
            self.bidi_class.to_string(),
            self.decomposition.as_ref().map(|d| d.to_string()).unwrap_or_default(),
            decimal,
            digit,
            numeric,
            if self.mirrored { "Y" } else { "N" }.to_string(),
            String::new(),
            String::new(),
            format_optional_code_point(self.upper),
            format_optional_code_point(self.lower),
            format_optional_code_point(self.title),
        ]
        .join(";")
    }

    pub fn code(&self) -> u32 {
        self.code
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn general_category(&self) -> GeneralCategory {
        self.general_category
    }
    pub fn combining_class(&self) -> u8 {
        self.combining_class
    }
    pub fn bidi_class(&self) -> BidiClass {
        self.bidi_class
    }
    pub fn decomposition(&self) -> Option<&Decomposition> {
        self.decomposition.as_ref()
    }
    pub fn mirrored(&self) -> bool {
        self.mirrored
    }
    pub fn numeric_type(&self) -> NumericType {
        self.numeric_type
    }
    pub fn numeric_value(&self) -> Option<&str> {
        self.numeric_value.as_deref()
    }
    pub fn upper(&self) -> Option<u32> {
        self.upper
    }
    pub fn lower(&self) -> Option<u32> {
        self.lower
    }
    pub fn title(&self) -> Option<u32> {
        self.title
    }
}

impl fmt::Display for CharacterRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "U+{} {}", format_code_point(self.code), self.name)
    }
}
