//! Translation of provider-native commodity codes into canonical SITC sectors.
//!
//! Eurostat already delivers one-digit SITC plus `TOTAL`; those codes are
//! validated against the closed set. Census delivers SITC as well but with
//! `-` for the total and deeper codes at other commodity levels, so the
//! first digit is taken. Comtrade delivers two-digit HS chapters that go
//! through a fixed chapter table.

use crate::domain::model::SectorCode;
use crate::domain::source::SourceId;

/// Inclusive HS chapter ranges and the SITC section they fall into.
/// Chapters 01 to 97 are covered; 77 is reserved in HS and follows its
/// base-metal neighbours.
const HS_CHAPTER_RANGES: &[(u8, u8, u8)] = &[
    (1, 14, 0),
    (15, 15, 4),
    (16, 21, 0),
    (22, 22, 1),
    (23, 23, 0),
    (24, 24, 1),
    (25, 26, 2),
    (27, 27, 3),
    (28, 39, 5),
    (40, 41, 6),
    (42, 43, 8),
    (44, 48, 6),
    (49, 49, 8),
    (50, 60, 6),
    (61, 67, 8),
    (68, 83, 6),
    (84, 89, 7),
    (90, 92, 8),
    (93, 93, 9),
    (94, 96, 8),
    (97, 97, 9),
];

pub const FIRST_DOCUMENTED_CHAPTER: u8 = 1;
pub const LAST_DOCUMENTED_CHAPTER: u8 = 97;

#[derive(Debug, Clone)]
pub struct ClassificationMapper {
    hs_chapters: [Option<u8>; 100],
}

impl ClassificationMapper {
    pub fn new() -> Self {
        let mut hs_chapters = [None; 100];
        for &(first, last, sector) in HS_CHAPTER_RANGES {
            for chapter in first..=last {
                hs_chapters[chapter as usize] = Some(sector);
            }
        }
        Self { hs_chapters }
    }

    pub fn map_code(&self, source: SourceId, native_code: &str) -> SectorCode {
        let code = native_code.trim();
        match source {
            SourceId::Eurostat => {
                SectorCode::parse_canonical(code).unwrap_or(SectorCode::Unclassified)
            }
            SourceId::Census => match code {
                "-" | "TOTAL" => SectorCode::Total,
                _ => code
                    .chars()
                    .next()
                    .and_then(|c| c.to_digit(10))
                    .map(|d| SectorCode::Sitc(d as u8))
                    .unwrap_or(SectorCode::Unclassified),
            },
            SourceId::Comtrade => {
                if code.eq_ignore_ascii_case("TOTAL") {
                    return SectorCode::Total;
                }
                self.map_hs_chapter(code)
            }
        }
    }

    fn map_hs_chapter(&self, code: &str) -> SectorCode {
        if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return SectorCode::Unclassified;
        }
        code.parse::<usize>()
            .ok()
            .and_then(|chapter| self.hs_chapters.get(chapter).copied().flatten())
            .map(SectorCode::Sitc)
            .unwrap_or(SectorCode::Unclassified)
    }

    /// Whether TOTAL has to be built from the sector rows because the
    /// provider's sector query does not return one.
    pub fn derives_total(&self, source: SourceId) -> bool {
        matches!(source, SourceId::Comtrade)
    }
}

impl Default for ClassificationMapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_documented_chapter_maps_into_the_canonical_set() {
        let mapper = ClassificationMapper::new();
        for chapter in FIRST_DOCUMENTED_CHAPTER..=LAST_DOCUMENTED_CHAPTER {
            let code = format!("{:02}", chapter);
            let sector = mapper.map_code(SourceId::Comtrade, &code);
            assert!(sector.is_canonical(), "chapter {} mapped to {:?}", code, sector);
            assert_ne!(sector, SectorCode::Total);
        }
    }

    #[test]
    fn test_codes_outside_documented_range_are_unclassified() {
        let mapper = ClassificationMapper::new();
        for code in ["00", "98", "99", "7", "270", "ab", "", "-1"] {
            assert_eq!(
                mapper.map_code(SourceId::Comtrade, code),
                SectorCode::Unclassified,
                "code {:?}",
                code
            );
        }
    }

    #[test]
    fn test_known_chapters() {
        let mapper = ClassificationMapper::new();
        assert_eq!(mapper.map_code(SourceId::Comtrade, "27"), SectorCode::Sitc(3));
        assert_eq!(mapper.map_code(SourceId::Comtrade, "15"), SectorCode::Sitc(4));
        assert_eq!(mapper.map_code(SourceId::Comtrade, "84"), SectorCode::Sitc(7));
        assert_eq!(mapper.map_code(SourceId::Comtrade, "22"), SectorCode::Sitc(1));
        assert_eq!(mapper.map_code(SourceId::Comtrade, "TOTAL"), SectorCode::Total);
    }

    #[test]
    fn test_eurostat_codes_are_validated_not_translated() {
        let mapper = ClassificationMapper::new();
        assert_eq!(mapper.map_code(SourceId::Eurostat, "0"), SectorCode::Sitc(0));
        assert_eq!(mapper.map_code(SourceId::Eurostat, "TOTAL"), SectorCode::Total);
        assert_eq!(mapper.map_code(SourceId::Eurostat, "S"), SectorCode::Unclassified);
        assert_eq!(mapper.map_code(SourceId::Eurostat, "33"), SectorCode::Unclassified);
    }

    #[test]
    fn test_census_total_marker_and_first_digit() {
        let mapper = ClassificationMapper::new();
        assert_eq!(mapper.map_code(SourceId::Census, "-"), SectorCode::Total);
        assert_eq!(mapper.map_code(SourceId::Census, "7"), SectorCode::Sitc(7));
        assert_eq!(mapper.map_code(SourceId::Census, "X"), SectorCode::Unclassified);
    }
}
