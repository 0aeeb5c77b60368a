use std::collections::HashMap;
use std::path::Path;

use chrono::{NaiveDate, NaiveTime};
use csv::{ReaderBuilder, Trim};
use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use trades_core::{FailedRow, FailureReason, ImportError, Result, TradeSide, TransactionRow};

// Column headers of the brokerage export.
const COL_TRADE_DATE: &str = "成交日期";
const COL_TRADE_TIME: &str = "成交时间";
const COL_SECURITY_CODE: &str = "证券代码";
const COL_SECURITY_NAME: &str = "证券名称";
const COL_SIDE: &str = "委托方向";
const COL_QUANTITY: &str = "成交数量";
const COL_PRICE: &str = "成交均价";
const COL_AMOUNT: &str = "成交金额";
const COL_COMMISSION: &str = "佣金";
const COL_OTHER_FEES: &str = "其他费用";
const COL_STAMP_TAX: &str = "印花税";
const COL_TRANSFER_FEE: &str = "过户费";
const COL_CASH_BALANCE: &str = "资金余额";
const COL_SHARE_BALANCE: &str = "股份余额";
const COL_ORDER_NO: &str = "委托编号";
const COL_TRADE_NO: &str = "成交编号";
const COL_MARKET: &str = "交易市场";
const COL_ACCOUNT: &str = "股东账号";
const COL_CURRENCY: &str = "币种";

/// Fixed column order of headerless `.txt` exports.
const TXT_COLUMNS: &[&str] = &[
    COL_TRADE_DATE,
    COL_TRADE_TIME,
    COL_SECURITY_CODE,
    COL_SECURITY_NAME,
    COL_SIDE,
    COL_QUANTITY,
    COL_PRICE,
    COL_AMOUNT,
    COL_COMMISSION,
    COL_OTHER_FEES,
    COL_STAMP_TAX,
    COL_TRANSFER_FEE,
    COL_CASH_BALANCE,
    COL_SHARE_BALANCE,
    COL_ORDER_NO,
    COL_TRADE_NO,
    COL_MARKET,
    COL_ACCOUNT,
    COL_CURRENCY,
];

// Cells exported as spreadsheet formulas, e.g. `="588200   "` or `= "A10001"`.
static FORMULA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^=\s*"(?s)(.*)"$"#).unwrap());

// Runs of two or more spaces, or tabs, separate the columns of txt exports.
static TXT_SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\t+|\s{2,}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Txt,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("txt") => InputFormat::Txt,
            _ => InputFormat::Csv,
        }
    }
}

/// Result of normalizing one input file. Rows keep file order; malformed
/// rows are reported alongside, never silently dropped.
#[derive(Debug)]
pub struct NormalizedFile {
    pub rows: Vec<TransactionRow>,
    pub malformed: Vec<FailedRow>,
}

impl NormalizedFile {
    pub fn total(&self) -> usize {
        self.rows.len() + self.malformed.len()
    }
}

/// Decodes and parses brokerage exports into `TransactionRow`s, cleaning
/// spreadsheet artifacts on the way.
pub struct CsvNormalizer {
    encoding: &'static Encoding,
}

impl CsvNormalizer {
    pub fn new(encoding_label: &str) -> Result<Self> {
        let encoding = Encoding::for_label(encoding_label.as_bytes()).ok_or_else(|| {
            ImportError::Config(format!("unknown file encoding {encoding_label:?}"))
        })?;
        Ok(Self { encoding })
    }

    pub fn normalize(&self, bytes: &[u8], format: InputFormat) -> Result<NormalizedFile> {
        let text = self.decode(bytes)?;
        match format {
            InputFormat::Csv => self.normalize_csv(&text),
            InputFormat::Txt => self.normalize_txt(&text),
        }
    }

    /// Decode with the configured encoding; fall back to strict UTF-8 when
    /// the declared encoding does not fit. If neither works the file is
    /// unusable and the run aborts.
    fn decode(&self, bytes: &[u8]) -> Result<String> {
        let (text, _, had_errors) = self.encoding.decode(bytes);
        if !had_errors {
            return Ok(text.into_owned());
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                debug!(
                    declared = self.encoding.name(),
                    "declared encoding did not fit, decoded as UTF-8"
                );
                Ok(text.to_string())
            }
            Err(_) => Err(ImportError::FileDecode(format!(
                "input is neither valid {} nor valid UTF-8",
                self.encoding.name()
            ))),
        }
    }

    fn normalize_csv(&self, text: &str) -> Result<NormalizedFile> {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| ImportError::FileDecode(format!("failed to read header row: {e}")))?
            .iter()
            .map(clean_cell)
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        let mut malformed = Vec::new();
        for (i, record) in reader.records().enumerate() {
            // Header occupies line 1.
            let line = i + 2;
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!(line, error = %e, "unreadable CSV record");
                    malformed.push(FailedRow {
                        line,
                        order_no: None,
                        reason: FailureReason::MalformedRow(e.to_string()),
                    });
                    continue;
                }
            };

            let mut fields = HashMap::new();
            for (name, value) in headers.iter().zip(record.iter()) {
                fields.insert(name.clone(), clean_cell(value));
            }
            collect_row(RawRow { line, fields }, &mut rows, &mut malformed);
        }

        Ok(NormalizedFile { rows, malformed })
    }

    /// Headerless whitespace-separated export. Columns follow the fixed
    /// brokerage layout in `TXT_COLUMNS`.
    fn normalize_txt(&self, text: &str) -> Result<NormalizedFile> {
        let mut rows = Vec::new();
        let mut malformed = Vec::new();
        for (i, raw_line) in text.lines().enumerate() {
            let line = i + 1;
            if raw_line.trim().is_empty() {
                continue;
            }
            let mut values: Vec<&str> = TXT_SEPARATOR_RE
                .split(raw_line.trim())
                .filter(|value| !value.is_empty())
                .collect();
            if values.len() <= 1 {
                // Single-space separated fallback.
                values = raw_line.split_whitespace().collect();
            }

            let mut fields = HashMap::new();
            for (name, value) in TXT_COLUMNS.iter().zip(values) {
                fields.insert((*name).to_string(), clean_cell(value));
            }
            collect_row(RawRow { line, fields }, &mut rows, &mut malformed);
        }

        Ok(NormalizedFile { rows, malformed })
    }
}

struct RawRow {
    line: usize,
    fields: HashMap<String, String>,
}

impl RawRow {
    fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    fn required(&self, column: &str) -> Result<&str> {
        self.get(column).ok_or_else(|| ImportError::MalformedRow {
            line: self.line,
            reason: format!("missing required column {column}"),
        })
    }

    fn number(&self, column: &str) -> Result<f64> {
        match self.get(column) {
            None => Ok(0.0),
            Some(raw) => self.parse_number(column, raw),
        }
    }

    fn optional_number(&self, column: &str) -> Result<Option<f64>> {
        match self.get(column) {
            None => Ok(None),
            Some(raw) => self.parse_number(column, raw).map(Some),
        }
    }

    fn parse_number(&self, column: &str, raw: &str) -> Result<f64> {
        normalize_numeric(raw)
            .parse::<f64>()
            .map_err(|_| ImportError::MalformedRow {
                line: self.line,
                reason: format!("unparsable number in {column}: {raw:?}"),
            })
    }
}

fn collect_row(raw: RawRow, rows: &mut Vec<TransactionRow>, malformed: &mut Vec<FailedRow>) {
    let line = raw.line;
    let order_no = raw.get(COL_ORDER_NO).map(str::to_string);
    match parse_row(raw) {
        Ok(row) => rows.push(row),
        Err(ImportError::MalformedRow { line, reason }) => {
            warn!(line, %reason, "rejecting malformed row");
            malformed.push(FailedRow {
                line,
                order_no,
                reason: FailureReason::MalformedRow(reason),
            });
        }
        Err(other) => {
            warn!(line, error = %other, "rejecting row");
            malformed.push(FailedRow {
                line,
                order_no,
                reason: FailureReason::MalformedRow(other.to_string()),
            });
        }
    }
}

fn parse_row(raw: RawRow) -> Result<TransactionRow> {
    let security_code = pad_security_code(raw.required(COL_SECURITY_CODE)?);
    let order_no = raw.required(COL_ORDER_NO)?.to_string();

    let trade_date = raw.get(COL_TRADE_DATE).map(|v| parse_date(&raw, v)).transpose()?;
    let trade_time = raw.get(COL_TRADE_TIME).and_then(parse_time);

    Ok(TransactionRow {
        line: raw.line,
        security_name: raw.get(COL_SECURITY_NAME).unwrap_or_default().to_string(),
        side: TradeSide::parse(raw.get(COL_SIDE).unwrap_or_default()),
        quantity: raw.number(COL_QUANTITY)?,
        price: raw.number(COL_PRICE)?,
        amount: raw.number(COL_AMOUNT)?,
        commission: raw.number(COL_COMMISSION)?,
        stamp_tax: raw.number(COL_STAMP_TAX)?,
        transfer_fee: raw.number(COL_TRANSFER_FEE)?,
        other_fees: raw.number(COL_OTHER_FEES)?,
        cash_balance: raw.optional_number(COL_CASH_BALANCE)?,
        market: raw.get(COL_MARKET).unwrap_or_default().to_string(),
        trade_date,
        trade_time,
        security_code,
        order_no,
    })
}

/// Reduce `="text"` spreadsheet formulas to `text`, and trim.
pub fn clean_cell(raw: &str) -> String {
    let trimmed = raw.trim();
    match FORMULA_RE.captures(trimmed) {
        Some(captures) => captures[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// Full-width digits and punctuation show up in numeric fields of some
/// exports; map them to ASCII and drop thousands separators.
fn normalize_numeric(raw: &str) -> String {
    raw.chars()
        .filter_map(|c| match c {
            '０'..='９' => {
                Some(char::from_u32('0' as u32 + (c as u32 - '０' as u32)).unwrap_or(c))
            }
            '．' => Some('.'),
            '－' => Some('-'),
            '＋' => Some('+'),
            ',' | '，' => None,
            c if c.is_whitespace() => None,
            c => Some(c),
        })
        .collect()
}

/// Security codes lose leading zeros when the export passed through a
/// spreadsheet; restore the 6-digit form.
fn pad_security_code(code: &str) -> String {
    let code = code.trim();
    if code.chars().all(|c| c.is_ascii_digit()) {
        if code.len() < 6 {
            return format!("{code:0>6}");
        }
        if code.len() > 6 {
            return code[..6].to_string();
        }
    }
    code.to_string()
}

fn parse_date(raw: &RawRow, value: &str) -> Result<NaiveDate> {
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(date);
        }
    }
    // Some exports put a full timestamp in the date column.
    for format in ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(datetime) = chrono::NaiveDateTime::parse_from_str(value, format) {
            return Ok(datetime.date());
        }
    }
    Err(ImportError::MalformedRow {
        line: raw.line,
        reason: format!("unparsable date in {COL_TRADE_DATE}: {value:?}"),
    })
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(value, format) {
            return Some(time);
        }
    }
    None
}
