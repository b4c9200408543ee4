use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Lower-cased cell values that are never part of a student name: roster
/// headers, letterhead words, statistics footers and short grade codes.
const VI_NAME_STOPWORDS: &[&str] = &[
    // roster headers
    "stt",
    "tt",
    "số tt",
    "họ",
    "tên",
    "họ và",
    "họ và tên",
    "họ tên",
    "họ và tên học sinh",
    "tên học sinh",
    "học sinh",
    "lớp",
    "điểm",
    "ghi chú",
    "ngày sinh",
    "giới tính",
    "nữ",
    "mã học sinh",
    "mã hs",
    "nhận xét",
    "môn",
    "môn học",
    "xếp loại",
    "học lực",
    "hạnh kiểm",
    "học tập",
    "rèn luyện",
    "kết quả",
    "vắng",
    "số buổi vắng",
    "có phép",
    "không phép",
    "tổng",
    "tổng cộng",
    "cộng",
    // letterhead
    "ubnd",
    "thcs",
    "thpt",
    "tiểu học",
    "cộng hòa",
    "cộng hoà",
    "độc lập",
    "phòng gd",
    "phòng gd&đt",
    "sở gd&đt",
    "ký tên",
    "giáo viên",
    "gvcn",
    "gvbm",
    "hiệu trưởng",
    "người lập",
    // statistics footer
    "tỉ lệ",
    "tỷ lệ",
    "số lượng",
    "thống kê",
    "sl",
    "tl",
    // grade codes and term columns
    "t",
    "k",
    "đ",
    "cđ",
    "đạt",
    "chưa đạt",
    "tốt",
    "khá",
    "hk1",
    "hk2",
    "hki",
    "hkii",
    "cn",
    "cả năm",
    "tb",
    "dtb",
    "đtb",
    "tbm",
    "ktđk",
    "đgtx",
    "đggk",
    "đgck",
    "p",
    "kp",
];

/// Upper-cased substrings marking school letterhead or sheet titles.
const VI_LETTERHEAD: &[&str] = &[
    "UBND",
    "CỘNG HÒA",
    "CỘNG HOÀ",
    "ĐỘC LẬP",
    "HẠNH PHÚC",
    "PHÒNG GD",
    "PHÒNG GIÁO DỤC",
    "SỞ GD",
    "SỞ GIÁO DỤC",
    "BẢNG ĐIỂM",
    "DANH SÁCH",
    "SỔ ĐIỂM",
    "SỔ THEO DÕI",
    "NĂM HỌC",
    "HỌC KỲ",
    "HỌC KÌ",
    "TRƯỜNG",
];

/// Upper-cased substrings marking statistics and signature footers.
const VI_FOOTER: &[&str] = &[
    "SỐ LƯỢNG",
    "TỈ LỆ",
    "TỶ LỆ",
    "THỐNG KÊ",
    "TỔNG SỐ",
    "TỔNG CỘNG",
    "NGƯỜI LẬP",
    "HIỆU TRƯỞNG",
    "GIÁO VIÊN",
    "KÝ TÊN",
    "XÁC NHẬN",
];

/// Lower-cased line prefixes of roster header lines in pasted text.
const VI_HEADER_PREFIXES: &[&str] = &["stt", "tt ", "họ và tên", "họ tên", "tên học sinh"];

/// Single-letter given names accepted as a name part.
const VI_SINGLE_LETTER_NAMES: &[&str] = &["ý"];

static VI_RATING_CODES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:t|k|đ|cđ|đạt|chưa đạt|tốt|khá)$").expect("rating code pattern")
});

/// Exclusion predicates used by the row scanner. Swapping the table swaps the
/// locale without touching the scan itself.
#[derive(Debug, Clone)]
pub struct KeywordTable {
    name_stopwords: HashSet<String>,
    letterhead: Vec<String>,
    footer: Vec<String>,
    header_prefixes: Vec<String>,
    single_letter_names: Vec<String>,
    rating_codes: Regex,
}

impl KeywordTable {
    pub fn vietnamese() -> Self {
        Self {
            name_stopwords: VI_NAME_STOPWORDS.iter().map(|s| s.to_string()).collect(),
            letterhead: to_owned(VI_LETTERHEAD),
            footer: to_owned(VI_FOOTER),
            header_prefixes: to_owned(VI_HEADER_PREFIXES),
            single_letter_names: to_owned(VI_SINGLE_LETTER_NAMES),
            rating_codes: VI_RATING_CODES.clone(),
        }
    }

    /// Adds caller-supplied stop words (matched exactly, case-insensitive).
    pub fn with_extra_stopwords<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for w in words {
            let w = w.as_ref().trim().to_lowercase();
            if !w.is_empty() {
                self.name_stopwords.insert(w);
            }
        }
        self
    }

    pub fn is_stopword(&self, lower: &str) -> bool {
        self.name_stopwords.contains(lower)
    }

    pub fn is_single_letter_name(&self, lower: &str) -> bool {
        self.single_letter_names.iter().any(|s| s == lower)
    }

    pub fn is_letterhead_or_footer(&self, upper: &str) -> bool {
        self.letterhead.iter().any(|s| upper.contains(s.as_str()))
            || self.footer.iter().any(|s| upper.contains(s.as_str()))
    }

    pub fn starts_with_header(&self, lower: &str) -> bool {
        self.header_prefixes
            .iter()
            .any(|p| lower.starts_with(p.as_str()))
    }

    pub fn is_rating_code(&self, s: &str) -> bool {
        self.rating_codes.is_match(s.trim())
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::vietnamese()
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Canonical subject labels with their lower-case trigger substrings, in
/// priority order.
const SUBJECTS: &[(&str, &[&str])] = &[
    ("Toán", &["toán"]),
    ("Ngữ văn", &["ngữ văn", "văn học", "tiếng việt"]),
    ("Tiếng Anh", &["tiếng anh", "anh văn", "english", "ngoại ngữ"]),
    (
        "KHTN",
        &[
            "khoa học tự nhiên",
            "khtn",
            "vật lý",
            "vật lí",
            "hóa học",
            "hoá học",
            "sinh học",
        ],
    ),
    ("LS & ĐL", &["lịch sử", "địa"]),
    ("GDCD", &["gdcd", "công dân"]),
    ("Tin học", &["tin học"]),
    ("Công nghệ", &["công nghệ"]),
    ("GDTC", &["gdtc", "thể dục", "thể chất"]),
    ("Âm nhạc", &["âm nhạc"]),
    ("Mĩ thuật", &["mĩ thuật", "mỹ thuật"]),
    ("HĐTN", &["hđtn", "trải nghiệm"]),
];

/// Returns the first subject whose keyword occurs in `header_text`.
pub fn detect_subject(header_text: &str) -> Option<&'static str> {
    let lower = header_text.to_lowercase();
    SUBJECTS
        .iter()
        .find(|(_, keys)| keys.iter().any(|k| lower.contains(k)))
        .map(|(label, _)| *label)
}

pub fn subject_labels() -> impl Iterator<Item = &'static str> {
    SUBJECTS.iter().map(|(label, _)| *label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_codes_match_case_insensitively() {
        let kw = KeywordTable::vietnamese();
        for code in ["T", "k", "Đ", "cđ", "CĐ", "Đạt", "Chưa đạt", " Tốt "] {
            assert!(kw.is_rating_code(code), "{code} should be a rating code");
        }
        for other in ["TB", "8", "An", ""] {
            assert!(!kw.is_rating_code(other), "{other} should not match");
        }
    }

    #[test]
    fn detect_subject_uses_priority_order() {
        assert_eq!(detect_subject("BẢNG ĐIỂM MÔN TOÁN - LỚP 6A"), Some("Toán"));
        assert_eq!(detect_subject("Môn: Lịch sử và Địa lí"), Some("LS & ĐL"));
        assert_eq!(detect_subject("toán và tin học"), Some("Toán"));
        assert_eq!(detect_subject("DANH SÁCH LỚP 7B"), None);
    }

    #[test]
    fn truong_blocks_anywhere_in_name() {
        let kw = KeywordTable::vietnamese();
        assert!(kw.is_letterhead_or_footer("TRƯỜNG THCS ĐOÀN BẢO ĐỨC"));
        assert!(kw.is_letterhead_or_footer("NGUYỄN VĂN TRƯỜNG"));
        assert!(!kw.is_stopword("trường"));
        assert!(kw.is_letterhead_or_footer("TỈ LỆ ĐẠT"));
    }

    #[test]
    fn extra_stopwords_are_normalized() {
        let kw = KeywordTable::vietnamese().with_extra_stopwords([" Dân Tộc ", ""]);
        assert!(kw.is_stopword("dân tộc"));
        assert!(!kw.is_stopword(""));
    }

    #[test]
    fn subject_labels_are_unique() {
        let labels: Vec<_> = subject_labels().collect();
        let unique: HashSet<_> = labels.iter().collect();
        assert_eq!(labels.len(), unique.len());
    }
}
