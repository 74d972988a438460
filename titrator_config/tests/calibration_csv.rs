use std::io::Write;

use rstest::rstest;
use tempfile::NamedTempFile;
use titrator_config::load_ph_calibration_csv;

fn csv_file(contents: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().expect("create temp file");
    f.write_all(contents.as_bytes()).expect("write csv");
    f.flush().expect("flush csv");
    f
}

#[test]
fn two_rows_become_the_anchors() {
    let f = csv_file("raw,ph\n4.21,4.0\n7.38,7.0\n");
    let points = load_ph_calibration_csv(f.path()).expect("load calibration");
    assert_eq!(points.low_read, 4.21);
    assert_eq!(points.low_actual, 4.0);
    assert_eq!(points.high_read, 7.38);
    assert_eq!(points.high_actual, 7.0);
}

#[test]
fn extremes_win_with_extra_rows() {
    // unsorted sheet with a mid-range check row
    let f = csv_file("raw,ph\n7.38,7.0\n4.21,4.0\n5.80,5.5\n");
    let points = load_ph_calibration_csv(f.path()).expect("load calibration");
    assert_eq!(points.low_read, 4.21);
    assert_eq!(points.high_read, 7.38);
}

#[test]
fn whitespace_is_trimmed() {
    let f = csv_file("raw,ph\n 4.21 , 4.0 \n 7.38 , 7.0 \n");
    let points = load_ph_calibration_csv(f.path()).expect("load calibration");
    assert_eq!(points.low_actual, 4.0);
}

#[rstest]
#[case("raw,grams\n1,2\n3,4\n", "headers exactly")]
#[case("raw,ph\n4.21,4.0\n", "at least two rows")]
#[case("raw,ph\n4.21,4.0\n4.21,7.0\n", "identical")]
#[case("raw,ph\n4.21,4.0\nnope,7.0\n", "invalid CSV row 3")]
fn malformed_sheets_are_rejected(#[case] contents: &str, #[case] needle: &str) {
    let f = csv_file(contents);
    let err = load_ph_calibration_csv(f.path()).expect_err("should fail");
    assert!(
        format!("{err}").contains(needle),
        "error {err} should mention {needle}"
    );
}
