//! Structural formula checks that run before the spreadsheet is touched.
//!
//! The scan tracks string literals (`"..."`, with `""` escapes), quoted sheet
//! names (`'My Sheet'!A1`), and nesting of `()`, `{}` and `[]`. Every
//! identifier immediately followed by `(` must be a built-in function or a
//! name bound by `LET` or `LAMBDA` in the same formula.

use std::collections::HashSet;

/// Check if a function name is a known built-in function.
///
/// Names must be uppercase. The `_xlfn.` / `_xlws.` prefixes Excel uses for
/// newer functions are stripped by the caller.
pub fn is_known_function(name: &str) -> bool {
    matches!(name,
        // Math and trigonometry
        "ABS" | "ACOS" | "ACOSH" | "ACOT" | "ACOTH" | "AGGREGATE" | "ARABIC" | "ASIN" |
        "ASINH" | "ATAN" | "ATAN2" | "ATANH" | "BASE" | "CEILING" | "CEILING.MATH" |
        "CEILING.PRECISE" | "COMBIN" | "COMBINA" | "COS" | "COSH" | "COT" | "COTH" | "CSC" |
        "CSCH" | "DECIMAL" | "DEGREES" | "EVEN" | "EXP" | "FACT" | "FACTDOUBLE" | "FLOOR" |
        "FLOOR.MATH" | "FLOOR.PRECISE" | "GCD" | "INT" | "ISO.CEILING" | "LCM" | "LN" |
        "LOG" | "LOG10" | "MDETERM" | "MINVERSE" | "MMULT" | "MOD" | "MROUND" |
        "MULTINOMIAL" | "MUNIT" | "ODD" | "PI" | "POWER" | "PRODUCT" | "QUOTIENT" |
        "RADIANS" | "RAND" | "RANDARRAY" | "RANDBETWEEN" | "ROMAN" | "ROUND" | "ROUNDDOWN" |
        "ROUNDUP" | "SEC" | "SECH" | "SEQUENCE" | "SERIESSUM" | "SIGN" | "SIN" | "SINH" |
        "SQRT" | "SQRTPI" | "SUBTOTAL" | "SUM" | "SUMIF" | "SUMIFS" | "SUMPRODUCT" |
        "SUMSQ" | "SUMX2MY2" | "SUMX2PY2" | "SUMXMY2" | "TAN" | "TANH" | "TRUNC" |
        // Statistical
        "AVEDEV" | "AVERAGE" | "AVERAGEA" | "AVERAGEIF" | "AVERAGEIFS" | "BETA.DIST" |
        "BETA.INV" | "BINOM.DIST" | "BINOM.DIST.RANGE" | "BINOM.INV" | "CHISQ.DIST" |
        "CHISQ.DIST.RT" | "CHISQ.INV" | "CHISQ.INV.RT" | "CHISQ.TEST" | "CONFIDENCE.NORM" |
        "CONFIDENCE.T" | "CORREL" | "COUNT" | "COUNTA" | "COUNTBLANK" | "COUNTIF" |
        "COUNTIFS" | "COVARIANCE.P" | "COVARIANCE.S" | "DEVSQ" | "EXPON.DIST" | "F.DIST" |
        "F.DIST.RT" | "F.INV" | "F.INV.RT" | "F.TEST" | "FISHER" | "FISHERINV" |
        "FORECAST" | "FORECAST.ETS" | "FORECAST.ETS.CONFINT" | "FORECAST.ETS.SEASONALITY" |
        "FORECAST.ETS.STAT" | "FORECAST.LINEAR" | "FREQUENCY" | "GAMMA" | "GAMMA.DIST" |
        "GAMMA.INV" | "GAMMALN" | "GAMMALN.PRECISE" | "GAUSS" | "GEOMEAN" | "GROWTH" |
        "HARMEAN" | "HYPGEOM.DIST" | "INTERCEPT" | "KURT" | "LARGE" | "LINEST" | "LOGEST" |
        "LOGNORM.DIST" | "LOGNORM.INV" | "MAX" | "MAXA" | "MAXIFS" | "MEDIAN" | "MIN" |
        "MINA" | "MINIFS" | "MODE.MULT" | "MODE.SNGL" | "NEGBINOM.DIST" | "NORM.DIST" |
        "NORM.INV" | "NORM.S.DIST" | "NORM.S.INV" | "PEARSON" | "PERCENTILE.EXC" |
        "PERCENTILE.INC" | "PERCENTRANK.EXC" | "PERCENTRANK.INC" | "PERMUT" |
        "PERMUTATIONA" | "PHI" | "POISSON.DIST" | "PROB" | "QUARTILE.EXC" | "QUARTILE.INC" |
        "RANK.AVG" | "RANK.EQ" | "RSQ" | "SKEW" | "SKEW.P" | "SLOPE" | "SMALL" |
        "STANDARDIZE" | "STDEV.P" | "STDEV.S" | "STDEVA" | "STDEVPA" | "STEYX" | "T.DIST" |
        "T.DIST.2T" | "T.DIST.RT" | "T.INV" | "T.INV.2T" | "T.TEST" | "TREND" | "TRIMMEAN" |
        "VAR.P" | "VAR.S" | "VARA" | "VARPA" | "WEIBULL.DIST" | "Z.TEST" |
        // Compatibility
        "BETADIST" | "BETAINV" | "BINOMDIST" | "CHIDIST" | "CHIINV" | "CHITEST" |
        "CONFIDENCE" | "COVAR" | "CRITBINOM" | "EXPONDIST" | "FDIST" | "FINV" | "FTEST" |
        "GAMMADIST" | "GAMMAINV" | "HYPGEOMDIST" | "LOGINV" | "LOGNORMDIST" | "MODE" |
        "NEGBINOMDIST" | "NORMDIST" | "NORMINV" | "NORMSDIST" | "NORMSINV" | "PERCENTILE" |
        "PERCENTRANK" | "POISSON" | "QUARTILE" | "RANK" | "STDEV" | "STDEVP" | "TDIST" |
        "TINV" | "TTEST" | "VAR" | "VARP" | "WEIBULL" | "ZTEST" |
        // Logical
        "AND" | "BYCOL" | "BYROW" | "FALSE" | "IF" | "IFERROR" | "IFNA" | "IFS" |
        "ISOMITTED" | "LAMBDA" | "LET" | "MAKEARRAY" | "MAP" | "NOT" | "OR" | "REDUCE" |
        "SCAN" | "SWITCH" | "TRUE" | "XOR" |
        // Information
        "CELL" | "ERROR.TYPE" | "INFO" | "ISBLANK" | "ISERR" | "ISERROR" | "ISEVEN" |
        "ISFORMULA" | "ISLOGICAL" | "ISNA" | "ISNONTEXT" | "ISNUMBER" | "ISODD" | "ISREF" |
        "ISTEXT" | "N" | "NA" | "SHEET" | "SHEETS" | "TYPE" |
        // Text
        "ARRAYTOTEXT" | "ASC" | "BAHTTEXT" | "CHAR" | "CLEAN" | "CODE" | "CONCAT" |
        "CONCATENATE" | "DBCS" | "DOLLAR" | "EXACT" | "FIND" | "FINDB" | "FIXED" | "LEFT" |
        "LEFTB" | "LEN" | "LENB" | "LOWER" | "MID" | "MIDB" | "NUMBERVALUE" | "PHONETIC" |
        "PROPER" | "REGEXEXTRACT" | "REGEXREPLACE" | "REGEXTEST" | "REPLACE" | "REPLACEB" |
        "REPT" | "RIGHT" | "RIGHTB" | "SEARCH" | "SEARCHB" | "SUBSTITUTE" | "T" | "TEXT" |
        "TEXTAFTER" | "TEXTBEFORE" | "TEXTJOIN" | "TEXTSPLIT" | "TRIM" | "UNICHAR" |
        "UNICODE" | "UPPER" | "VALUE" | "VALUETOTEXT" |
        // Lookup and reference
        "ADDRESS" | "AREAS" | "CHOOSE" | "CHOOSECOLS" | "CHOOSEROWS" | "COLUMN" |
        "COLUMNS" | "DROP" | "EXPAND" | "FILTER" | "FORMULATEXT" | "GETPIVOTDATA" |
        "GROUPBY" | "HLOOKUP" | "HSTACK" | "HYPERLINK" | "IMAGE" | "INDEX" | "INDIRECT" |
        "LOOKUP" | "MATCH" | "OFFSET" | "PIVOTBY" | "ROW" | "ROWS" | "RTD" | "SORT" |
        "SORTBY" | "TAKE" | "TOCOL" | "TOROW" | "TRANSPOSE" | "TRIMRANGE" | "UNIQUE" |
        "VLOOKUP" | "VSTACK" | "WRAPCOLS" | "WRAPROWS" | "XLOOKUP" | "XMATCH" |
        // Date and time
        "DATE" | "DATEDIF" | "DATEVALUE" | "DAY" | "DAYS" | "DAYS360" | "EDATE" |
        "EOMONTH" | "HOUR" | "ISOWEEKNUM" | "MINUTE" | "MONTH" | "NETWORKDAYS" |
        "NETWORKDAYS.INTL" | "NOW" | "SECOND" | "TIME" | "TIMEVALUE" | "TODAY" | "WEEKDAY" |
        "WEEKNUM" | "WORKDAY" | "WORKDAY.INTL" | "YEAR" | "YEARFRAC" |
        // Database
        "DAVERAGE" | "DCOUNT" | "DCOUNTA" | "DGET" | "DMAX" | "DMIN" | "DPRODUCT" |
        "DSTDEV" | "DSTDEVP" | "DSUM" | "DVAR" | "DVARP" |
        // Financial
        "ACCRINT" | "ACCRINTM" | "AMORDEGRC" | "AMORLINC" | "COUPDAYBS" | "COUPDAYS" |
        "COUPDAYSNC" | "COUPNCD" | "COUPNUM" | "COUPPCD" | "CUMIPMT" | "CUMPRINC" | "DB" |
        "DDB" | "DISC" | "DOLLARDE" | "DOLLARFR" | "DURATION" | "EFFECT" | "FV" |
        "FVSCHEDULE" | "INTRATE" | "IPMT" | "IRR" | "ISPMT" | "MDURATION" | "MIRR" |
        "NOMINAL" | "NPER" | "NPV" | "ODDFPRICE" | "ODDFYIELD" | "ODDLPRICE" | "ODDLYIELD" |
        "PDURATION" | "PMT" | "PPMT" | "PRICE" | "PRICEDISC" | "PRICEMAT" | "PV" | "RATE" |
        "RECEIVED" | "RRI" | "SLN" | "STOCKHISTORY" | "SYD" | "TBILLEQ" | "TBILLPRICE" |
        "TBILLYIELD" | "VDB" | "XIRR" | "XNPV" | "YIELD" | "YIELDDISC" | "YIELDMAT" |
        // Engineering
        "BESSELI" | "BESSELJ" | "BESSELK" | "BESSELY" | "BIN2DEC" | "BIN2HEX" | "BIN2OCT" |
        "BITAND" | "BITLSHIFT" | "BITOR" | "BITRSHIFT" | "BITXOR" | "COMPLEX" | "CONVERT" |
        "DEC2BIN" | "DEC2HEX" | "DEC2OCT" | "DELTA" | "ERF" | "ERF.PRECISE" | "ERFC" |
        "ERFC.PRECISE" | "GESTEP" | "HEX2BIN" | "HEX2DEC" | "HEX2OCT" | "IMABS" |
        "IMAGINARY" | "IMARGUMENT" | "IMCONJUGATE" | "IMCOS" | "IMCOSH" | "IMCOT" |
        "IMCSC" | "IMCSCH" | "IMDIV" | "IMEXP" | "IMLN" | "IMLOG10" | "IMLOG2" | "IMPOWER" |
        "IMPRODUCT" | "IMREAL" | "IMSEC" | "IMSECH" | "IMSIN" | "IMSINH" | "IMSQRT" |
        "IMSUB" | "IMSUM" | "IMTAN" | "OCT2BIN" | "OCT2DEC" | "OCT2HEX" |
        // Cube and web
        "CUBEKPIMEMBER" | "CUBEMEMBER" | "CUBEMEMBERPROPERTY" | "CUBERANKEDMEMBER" |
        "CUBESET" | "CUBESETCOUNT" | "CUBEVALUE" | "ENCODEURL" | "FILTERXML" |
        "WEBSERVICE"
    )
}

/// An open bracket and, for `(`, the call it belongs to.
struct Frame {
    open: char,
    at: usize,
    function: Option<String>,
    arg: usize,
    arg_start: usize,
}

impl Frame {
    fn new(open: char, at: usize, function: Option<String>) -> Self {
        Self {
            open,
            at,
            function,
            arg: 0,
            arg_start: at + 1,
        }
    }
}

/// Check a formula's structure.
///
/// Returns a human-readable description of the first problem found.
pub fn check_syntax(formula: &str) -> Result<(), String> {
    let formula = formula.trim();
    if formula.is_empty() {
        return Err("formula cannot be empty".into());
    }
    let Some(body) = formula.strip_prefix('=') else {
        return Err("formula must start with '='".into());
    };
    if body.trim().is_empty() {
        return Err("formula has no expression after '='".into());
    }

    let chars: Vec<char> = body.chars().collect();
    let mut stack: Vec<Frame> = Vec::new();
    let mut calls: Vec<String> = Vec::new();
    let mut bound: HashSet<String> = HashSet::new();
    let mut ident = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                ident.clear();
                i = skip_quoted(&chars, i, '"').ok_or("unterminated string literal")?;
                continue;
            }
            '\'' => {
                ident.clear();
                i = skip_quoted(&chars, i, '\'').ok_or("unterminated quoted sheet name")?;
                continue;
            }
            '(' => {
                let function = if ident.is_empty() {
                    None
                } else {
                    let name = function_name(&ident)?;
                    calls.push(std::mem::take(&mut ident));
                    Some(name)
                };
                stack.push(Frame::new('(', i, function));
            }
            ',' => {
                ident.clear();
                if let Some(frame) = stack.last_mut() {
                    if let Some(name) = binding(frame, &chars[frame.arg_start..i]) {
                        bound.insert(name);
                    }
                    frame.arg += 1;
                    frame.arg_start = i + 1;
                }
            }
            '{' | '[' => {
                ident.clear();
                stack.push(Frame::new(c, i, None));
            }
            ')' | '}' | ']' => {
                ident.clear();
                let open = match c {
                    ')' => '(',
                    '}' => '{',
                    _ => '[',
                };
                match stack.pop() {
                    Some(frame) if frame.open == open => {}
                    Some(frame) => {
                        return Err(format!(
                            "'{c}' at position {} does not close '{}' at position {}",
                            i + 2,
                            frame.open,
                            frame.at + 2
                        ));
                    }
                    None => return Err(format!("unexpected '{c}' at position {}", i + 2)),
                }
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                return Err("use a single '=' for comparison, not '=='".into());
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => ident.push(c),
            _ => ident.clear(),
        }
        i += 1;
    }

    if let Some(frame) = stack.pop() {
        return Err(format!(
            "unclosed '{}' at position {}",
            frame.open,
            frame.at + 2
        ));
    }

    // Checked after the scan so every LET and LAMBDA binding is known.
    for call in calls {
        let name = normalize(&call);
        if !is_known_function(&name) && !bound.contains(&name) {
            return Err(format!("unknown function '{call}'"));
        }
    }
    Ok(())
}

/// Name introduced by the argument that just ended, if any.
///
/// `LET(name1, value1, ..., body)` binds every even argument and
/// `LAMBDA(param1, ..., body)` binds every argument before the body. Only
/// arguments followed by a comma are candidates, so a body never binds.
fn binding(frame: &Frame, arg: &[char]) -> Option<String> {
    let binds = match frame.function.as_deref() {
        Some("LET") => frame.arg % 2 == 0,
        Some("LAMBDA") => true,
        _ => false,
    };
    if !binds {
        return None;
    }
    let text: String = arg.iter().collect();
    let text = text.trim();
    let is_name = text.starts_with(|c: char| c.is_alphabetic() || c == '_')
        && text.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    is_name.then(|| normalize(text))
}

/// Index just past the closing quote, honouring doubled-quote escapes.
fn skip_quoted(chars: &[char], start: usize, quote: char) -> Option<usize> {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// Uppercase, without the `_xlfn.` / `_xlws.` prefixes.
fn normalize(ident: &str) -> String {
    let upper = ident.to_uppercase();
    match upper
        .strip_prefix("_XLFN.")
        .or_else(|| upper.strip_prefix("_XLWS."))
    {
        Some(name) => name.to_string(),
        None => upper,
    }
}

fn function_name(ident: &str) -> Result<String, String> {
    // Leading digits mean a number, e.g. `2(`, which Excel rejects anyway.
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(format!("unexpected '(' after '{ident}'"));
    }
    Ok(normalize(ident))
}
