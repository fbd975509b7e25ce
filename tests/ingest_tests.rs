//! End-to-end ingestion tests: files on disk through sniffing, reading,
//! assembly, cleaning and export.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use cp_ingest::clean::{add_calculated_parameter, clean, ratio, CleanMethod, DEFAULT_THRESHOLD};
use cp_ingest::export::write_cleaned;
use cp_ingest::parser::DcpReader;
use cp_ingest::stats::compute_statistics;
use cp_ingest::{combine, read_lot, read_lot_with_config, FormatReader, Lot, Parameter, ReaderConfig, Wafer};
use flate2::write::GzEncoder;
use flate2::Compression;
use proptest::prelude::*;
use rust_xlsxwriter::Workbook;
use tempfile::TempDir;

fn dcp_text(lot: &str, rows: &[(i64, i64, i64, i64, &str, &str)]) -> String {
    let mut text = format!(
        "Lot:\t{lot}\n\
         Device:\tSVD2N60\n\
         No.U\tX\tY\tBin\tVTH\tIDSS\n\
         Unit\t\t\t\tV\tuA\n\
         LimitL\t\t\t\t2\t\n\
         LimitU\t\t\t\t4\t1\n"
    );
    for (seq, x, y, bin, vth, idss) in rows {
        text.push_str(&format!("{seq}\t{x}\t{y}\t{bin}\t{vth}\t{idss}\n"));
    }
    text
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn wafer_ids(lot: &Lot) -> Vec<&str> {
    lot.wafers.iter().map(|w| w.wafer_id.as_str()).collect()
}

#[test]
fn test_dcp_lot_from_two_files() {
    let tmp = TempDir::new().unwrap();
    let a = write(
        &tmp,
        "B01_01.txt",
        &dcp_text("B01", &[(1, 0, 0, 1, "3.0", "0.2"), (2, 1, 0, 1, "3.1", "0.3")]),
    );
    let b = write(&tmp, "B01_02.txt", &dcp_text("B01", &[(1, 0, 0, 2, "1.5", "5")]));

    let lot = read_lot(&[a, b], 1);
    assert_eq!(lot.lot_id, "B01");
    assert_eq!(lot.product, "SVD2N60");
    assert_eq!(wafer_ids(&lot), vec!["01", "02"]);
    assert_eq!(lot.params.len(), 2);

    let table = lot.combined.as_ref().unwrap();
    assert_eq!(table.len(), 3);
    let idss = table.column("IDSS").unwrap();
    assert!((idss[2].unwrap() - 5e-6).abs() < 1e-15);
    let limit = lot.parameter("IDSS").unwrap().upper_limit.unwrap();
    assert!((limit - 1e-6).abs() < 1e-18);
}

#[test]
fn test_mixed_batch_skips_bad_files() {
    let tmp = TempDir::new().unwrap();
    let cw = write(
        &tmp,
        "C77.csv",
        "Lot,C77\n\
         Seq,Bin,X,Y,VTH\n\
         Unit,,,,mV\n\
         LimitL,,,,2000\n\
         LimitU,,,,4000\n\
         WAFER:,01,2\n\
         1,1,0,0,3000\n\
         2,1,1,0,3100\n\
         WAFER:,02,9\n\
         1,1,0,0,2900\n\
         WAFER:,03,1\n\
         1,1,0,0,3050\n",
    );
    let unknown = write(&tmp, "notes.md", "# not test data\n");
    let broken = write(&tmp, "C77_09.txt", "no header here\n");

    let lot = read_lot(&[cw, unknown, broken], 1);
    assert_eq!(lot.lot_id, "C77");
    assert_eq!(wafer_ids(&lot), vec!["01", "03"]);
    assert_eq!(lot.chip_count(), 3);
    let vth = lot.parameter("VTH").unwrap();
    assert_eq!(vth.unit, "V");
    assert!((vth.lower_limit.unwrap() - 2.0).abs() < 1e-12);
    let values = lot.combined.as_ref().unwrap().column("VTH").unwrap();
    assert!((values[2].unwrap() - 3.05).abs() < 1e-12);
}

#[test]
fn test_gzip_input() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("G5_07.txt.gz");
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(dcp_text("G5", &[(1, 0, 0, 1, "3.3", "0.1")]).as_bytes())
        .unwrap();
    fs::write(&path, enc.finish().unwrap()).unwrap();

    let lot = read_lot(&[path], 1);
    assert_eq!(wafer_ids(&lot), vec!["07"]);
    assert_eq!(lot.chip_count(), 1);
}

#[test]
fn test_duplicate_wafer_ids_are_suffixed() {
    let tmp = TempDir::new().unwrap();
    let text = dcp_text("D1", &[(1, 0, 0, 1, "3.0", "0.2")]);
    let a = write(&tmp, "D1_01.txt", &text);
    let dir = tmp.path().join("retest");
    fs::create_dir(&dir).unwrap();
    let b = dir.join("D1_01.txt");
    fs::write(&b, &text).unwrap();

    let lot = read_lot(&[a, b], 1);
    assert_eq!(wafer_ids(&lot), vec!["01", "012"]);
    assert_eq!(lot.params.len(), 2);
}

#[test]
fn test_format_reader_trait() {
    let tmp = TempDir::new().unwrap();
    let a = write(&tmp, "E3_01.txt", &dcp_text("E3", &[(1, 0, 0, 1, "3.0", "0.2")]));
    let missing = tmp.path().join("E3_02.txt");
    let lot = DcpReader::default().read(&[a, missing], 1);
    assert_eq!(wafer_ids(&lot), vec!["01"]);
    assert_eq!(lot.combined.as_ref().unwrap().len(), 1);
}

#[test]
fn test_config_from_json() {
    let tmp = TempDir::new().unwrap();
    let cw = write(
        &tmp,
        "F2.csv",
        "Seq,Bin,X,Y,RDSON\n\
         Unit,,,,mOhm\n\
         LimitL,,,,\n\
         LimitU,,,,900\n\
         DIE BLOCK,A,1\n\
         1,2,0,0,850\n",
    );
    let config = ReaderConfig::from_json_str(r#"{"pass_bin": 2, "wafer_block_marker": "DIE BLOCK"}"#)
        .unwrap();
    let mut lot = read_lot_with_config(&[cw], &config);
    assert_eq!(lot.pass_bin, 2);
    assert_eq!(wafer_ids(&lot), vec!["A"]);

    compute_statistics(&mut lot);
    assert_eq!(lot.wafers[0].yield_pct, Some(100.0));
    let stats = lot.params[0].stats.as_ref().unwrap();
    assert_eq!(stats.yield_pct, Some(100.0));
}

#[test]
fn test_clean_then_export() {
    let tmp = TempDir::new().unwrap();
    let rows: Vec<(i64, i64, i64, i64, String, String)> = (0..12)
        .map(|i| {
            let vth = if i == 11 { "40".to_string() } else { format!("3.{}", i % 3) };
            (i + 1, i, 0, 1, vth, "0.5".to_string())
        })
        .collect();
    let borrowed: Vec<_> = rows
        .iter()
        .map(|(s, x, y, b, v, i)| (*s, *x, *y, *b, v.as_str(), i.as_str()))
        .collect();
    let path = write(&tmp, "H8_04.txt", &dcp_text("H8", &borrowed));

    let mut lot = read_lot(&[path], 1);
    let before = lot.combined.as_ref().unwrap().len();
    let report = clean(&mut lot, CleanMethod::Iqr, DEFAULT_THRESHOLD);
    assert_eq!(report.nulled_in("VTH"), 1);
    assert_eq!(lot.combined.as_ref().unwrap().len(), before);

    add_calculated_parameter(&mut lot, "VTH_IDSS", ratio("VTH", "IDSS")).unwrap();
    assert_eq!(lot.wafers[0].chip_data.column("VTH_IDSS").unwrap()[11], None);

    let mut out = Vec::new();
    write_cleaned(&lot, &mut out, &["VTH".to_string()]).unwrap();
    let text = String::from_utf8(out).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("LotID,WaferID,Seq,Bin,X,Y,VTH,IDSS,VTH_IDSS"));
    assert_eq!(lines.next(), Some("H8,04,1,1,0,0,3.00,5.00e-07,6e+06"));
    assert_eq!(text.lines().count(), 13);
}

/// Two wafer sheets in the labelled layout plus a sheet without a header.
fn write_workbook(path: &Path) {
    let mut workbook = Workbook::new();
    for (name, vth_mv) in [("W01", [3000.0, 3200.0]), ("W02", [2900.0, 4500.0])] {
        let sheet = workbook.add_worksheet();
        sheet.set_name(name).unwrap();
        sheet.write_string(0, 0, "Lot ID").unwrap();
        sheet.write_string(0, 1, "M12").unwrap();
        for (col, title) in ["No.U", "X", "Y", "Bin", "VTH", "IDSS"].iter().enumerate() {
            sheet.write_string(1, col as u16, *title).unwrap();
        }
        sheet.write_string(2, 0, "Unit").unwrap();
        sheet.write_string(2, 4, "mV").unwrap();
        sheet.write_string(2, 5, "nA").unwrap();
        sheet.write_string(3, 0, "LimitU").unwrap();
        sheet.write_number(3, 4, 4000.0).unwrap();
        sheet.write_string(3, 5, "1uA").unwrap();
        for (i, vth) in vth_mv.iter().enumerate() {
            let row = 4 + i as u32;
            sheet.write_number(row, 0, (i + 1) as f64).unwrap();
            sheet.write_number(row, 1, i as f64).unwrap();
            sheet.write_number(row, 2, 0.0).unwrap();
            sheet.write_number(row, 3, 1.0).unwrap();
            sheet.write_number(row, 4, *vth).unwrap();
            sheet.write_number(row, 5, 200.0).unwrap();
        }
    }
    let notes = workbook.add_worksheet();
    notes.set_name("Notes").unwrap();
    notes.write_string(0, 0, "operator comments").unwrap();
    workbook.save(path).unwrap();
}

#[test]
fn test_mex_workbook() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("M12.xlsx");
    write_workbook(&path);

    let lot = read_lot(&[path], 1);
    assert_eq!(lot.lot_id, "M12");
    assert_eq!(wafer_ids(&lot), vec!["W01", "W02"]);
    assert_eq!(lot.params.len(), 2);

    let vth = lot.parameter("VTH").unwrap();
    assert_eq!(vth.unit, "V");
    assert!((vth.upper_limit.unwrap() - 4.0).abs() < 1e-12);
    let idss = lot.parameter("IDSS").unwrap();
    assert_eq!(idss.unit, "A");
    assert!((idss.upper_limit.unwrap() - 1e-6).abs() < 1e-18);

    let table = lot.combined.as_ref().unwrap();
    assert_eq!(table.len(), 4);
    assert_eq!(table.x, vec![0, 1, 0, 1]);
    let values = table.column("VTH").unwrap();
    assert!((values[3].unwrap() - 4.5).abs() < 1e-12);
    assert!((table.column("IDSS").unwrap()[0].unwrap() - 2e-7).abs() < 1e-18);
}

#[test]
fn test_workbook_behind_txt_extension() {
    let tmp = TempDir::new().unwrap();
    let native = tmp.path().join("M12.xlsx");
    write_workbook(&native);
    let disguised = tmp.path().join("M12_05.txt");
    fs::rename(&native, &disguised).unwrap();

    let lot = read_lot(&[disguised], 1);
    assert_eq!(lot.lot_id, "M12");
    assert_eq!(wafer_ids(&lot), vec!["05"]);
    assert_eq!(lot.chip_count(), 2);
    let values = lot.combined.as_ref().unwrap().column("VTH").unwrap();
    assert!((values[1].unwrap() - 3.2).abs() < 1e-12);
}

#[test]
fn test_text_starting_with_pk_is_read_as_dcp() {
    let tmp = TempDir::new().unwrap();
    let text = format!("PKG:\tTO220\n{}", dcp_text("K4", &[(1, 0, 0, 1, "3.0", "0.2")]));
    let path = write(&tmp, "K4_02.txt", &text);

    let lot = read_lot(&[path], 1);
    assert_eq!(wafer_ids(&lot), vec!["02"]);
    assert_eq!(lot.chip_count(), 1);
}

fn synthetic_lot(sizes: &[usize]) -> Lot {
    let mut lot = Lot::new("P", 1);
    lot.append_parameters(vec![Parameter::new("VTH", "V")]);
    for (w, &n) in sizes.iter().enumerate() {
        let mut wafer = Wafer::new(format!("{:02}", w + 1), Path::new("synthetic.txt"));
        for i in 0..n {
            wafer.seq.push((n - i) as i64);
            wafer.bin.push(1);
            wafer.x.push(i as i64);
            wafer.y.push(w as i64);
        }
        wafer
            .chip_data
            .insert("VTH", (0..n).map(|i| Some(i as f64 * 0.1)).collect());
        lot.append_wafer(wafer);
    }
    lot
}

proptest! {
    #[test]
    fn prop_combined_rows_match_chip_count(sizes in prop::collection::vec(0usize..40, 0..6)) {
        let lot = synthetic_lot(&sizes);
        prop_assert_eq!(combine(&lot).len(), sizes.iter().sum::<usize>());
    }

    #[test]
    fn prop_clean_never_removes_rows(sizes in prop::collection::vec(1usize..30, 1..5), sd in 0.5f64..4.0) {
        let mut lot = synthetic_lot(&sizes);
        let before = combine(&lot).len();
        clean(&mut lot, CleanMethod::StdDev, sd);
        prop_assert_eq!(lot.combined.as_ref().map(|t| t.len()), Some(before));
        prop_assert_eq!(combine(&lot).len(), before);
    }
}
