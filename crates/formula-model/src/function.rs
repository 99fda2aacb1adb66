use core::fmt;

use serde::{Deserialize, Serialize};

macro_rules! functions {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Spreadsheet functions known to the compiler.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum Function {
            $($variant),*
        }

        impl Function {
            pub const ALL: &'static [Function] = &[$(Function::$variant),*];

            /// Canonical (upper-case) spreadsheet name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Function::$variant => $name),*
                }
            }

            /// Case-insensitive lookup by spreadsheet name.
            pub fn from_name(name: &str) -> Option<Function> {
                let upper = name.to_ascii_uppercase();
                match upper.as_str() {
                    $($name => Some(Function::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

functions! {
    // Aggregates, desugared into folds.
    Sum => "SUM",
    Product => "PRODUCT",
    Min => "MIN",
    Max => "MAX",
    Count => "COUNT",
    Average => "AVERAGE",
    SumSq => "SUMSQ",
    Var => "VAR",
    VarP => "VARP",
    StDev => "STDEV",
    StDevP => "STDEVP",
    And => "AND",
    Or => "OR",
    SumIf => "SUMIF",
    CountIf => "COUNTIF",
    // Database aggregates.
    DSum => "DSUM",
    DCount => "DCOUNT",
    DProduct => "DPRODUCT",
    DMin => "DMIN",
    DMax => "DMAX",
    DAverage => "DAVERAGE",
    DVar => "DVAR",
    DVarP => "DVARP",
    DStDev => "DSTDEV",
    DStDevP => "DSTDEVP",
    // Lookup.
    Match => "MATCH",
    Index => "INDEX",
    Choose => "CHOOSE",
    // Logic and information.
    If => "IF",
    Not => "NOT",
    True => "TRUE",
    False => "FALSE",
    Na => "NA",
    IsBlank => "ISBLANK",
    IsNumber => "ISNUMBER",
    IsText => "ISTEXT",
    N => "N",
    T => "T",
    // Math.
    Abs => "ABS",
    Round => "ROUND",
    RoundDown => "ROUNDDOWN",
    RoundUp => "ROUNDUP",
    Int => "INT",
    Trunc => "TRUNC",
    Mod => "MOD",
    Sqrt => "SQRT",
    Power => "POWER",
    Sign => "SIGN",
    Exp => "EXP",
    Ln => "LN",
    Log10 => "LOG10",
    Pi => "PI",
    // Text.
    Concatenate => "CONCATENATE",
    Left => "LEFT",
    Right => "RIGHT",
    Mid => "MID",
    Lower => "LOWER",
    Upper => "UPPER",
    Proper => "PROPER",
    Trim => "TRIM",
    Rept => "REPT",
    Substitute => "SUBSTITUTE",
    Replace => "REPLACE",
    Len => "LEN",
    Exact => "EXACT",
    Value => "VALUE",
}

impl Function {
    /// Functions whose result is always text.
    pub fn returns_text(self) -> bool {
        matches!(
            self,
            Function::Concatenate
                | Function::Left
                | Function::Right
                | Function::Mid
                | Function::Lower
                | Function::Upper
                | Function::Proper
                | Function::Trim
                | Function::Rept
                | Function::Substitute
                | Function::Replace
                | Function::T
        )
    }

    /// Aggregates over a table with a header row and a criteria range.
    pub fn is_database(self) -> bool {
        matches!(
            self,
            Function::DSum
                | Function::DCount
                | Function::DProduct
                | Function::DMin
                | Function::DMax
                | Function::DAverage
                | Function::DVar
                | Function::DVarP
                | Function::DStDev
                | Function::DStDevP
        )
    }

    /// Functions taking any number of (possibly range-shaped) arguments.
    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            Function::Sum
                | Function::Product
                | Function::Min
                | Function::Max
                | Function::Count
                | Function::Average
                | Function::SumSq
                | Function::Var
                | Function::VarP
                | Function::StDev
                | Function::StDevP
                | Function::And
                | Function::Or
        )
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
