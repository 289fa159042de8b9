// 篩選條件標籤（與提示詞中的表格一致）

pub const EXCLUSION_TAGS: &[(&str, &str)] = &[
    ("EXC-1", "Non-human study"),
    ("EXC-2", "Multi-organ transplant only"),
    ("EXC-3", "Combinatorial perfusion"),
    ("EXC-4", "Retransplantation population"),
    ("EXC-5", "Review/meta-analysis"),
    ("EXC-6", "Editorial/letter/commentary"),
    ("EXC-7", "Case report"),
    ("EXC-8", "Conference abstract only"),
    ("EXC-9", "Pediatric only"),
    ("EXC-10", "Insufficient data"),
];

pub const INCLUSION_TAGS: &[(&str, &str)] = &[
    ("INC-1", "Study design: RCT or matched NRS"),
    ("INC-2", "Intervention: HOPE or NMP"),
    ("INC-3", "Comparator: SCS"),
    ("INC-4", "Population: adult liver transplant"),
    ("INC-5", "Donor type: ECD"),
];

/// `L1_exclusion_tags` 以逗號分隔，逐一比對避免 EXC-1 誤中 EXC-10
pub fn split_tags(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|t| !t.is_empty())
}

pub fn has_tag(value: &str, tag: &str) -> bool {
    split_tags(value).any(|t| t == tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_tag_matches_whole_tags_only() {
        assert!(has_tag("EXC-1, EXC-5", "EXC-5"));
        assert!(!has_tag("EXC-10", "EXC-1"));
        assert!(!has_tag("", "EXC-1"));
    }
}
