use std::fs;
use std::sync::Arc;
use tracklet_algorithms::{process_events, DerivativeTable, FitConfig, TrackFitter};
use tracklet_core::constants::{KPHI1, KZ, RMEAN};
use tracklet_core::{
    Candidate, CandidateRef, FixedHelix, FixedWord, HelixParams, LayerResidual, SeedTopology,
};
use tracklet_io::{
    export_tables, load_derivative_table, read_events, write_events, write_hit_patterns,
    write_outputs, EventOutput, EventRecord, InputRecord, UnitRecord,
};

const PATTERNS: &str = "111100 0000000000 1\n110000 1010000000 1\n111000 1000000000 1\n";

fn residual(layer: u8, truth: &HelixParams, seed: &HelixParams) -> LayerResidual {
    let r = RMEAN[usize::from(layer) - 1];
    let phi = |p: &HelixParams| p.phi0 - (0.5 * r * p.rinv).asin();
    let z = |p: &HelixParams| p.z0 + p.t * (2.0 / p.rinv) * (0.5 * r * p.rinv).asin();
    let dphi = phi(truth) - phi(seed);
    let dz = z(truth) - z(seed);
    LayerResidual {
        phi: dphi,
        z: dz,
        phi_exact: dphi,
        z_exact: dz,
        iphi: FixedWord::signed((dphi / KPHI1) as i32, 17).unwrap(),
        iz: FixedWord::signed((dz / KZ) as i32, 12).unwrap(),
    }
}

fn candidate(tcid: u32) -> Candidate {
    let truth = HelixParams::new(0.002, 0.1, 0.5, 1.0);
    let seed = HelixParams::new(0.0021, 0.1005, 0.51, 0.8);
    Candidate::new(
        tcid,
        0,
        SeedTopology::Barrel { layer: 1 },
        seed,
        seed,
        FixedHelix::digitize(&seed).unwrap(),
    )
    .with_layer_match(3, residual(3, &truth, &seed))
    .with_layer_match(4, residual(4, &truth, &seed))
}

fn input(port: &str, entries: &[usize]) -> InputRecord {
    InputRecord {
        port: port.into(),
        name: format!("FM_{port}"),
        entries: entries.iter().map(|&i| CandidateRef(i)).collect(),
    }
}

fn event() -> EventRecord {
    EventRecord {
        candidates: vec![candidate(1), candidate(2)],
        units: vec![UnitRecord {
            name: "FT_L1L2".into(),
            sector: 0,
            inputs: vec![
                input("fullmatch1in1", &[0, 1]),
                input("fullmatch2in1", &[1]),
            ],
        }],
    }
}

#[test]
fn test_export_writes_all_tables() {
    let dir = tempfile::tempdir().unwrap();
    let patterns = dir.path().join("fitpattern.txt");
    fs::write(&patterns, PATTERNS).unwrap();
    let table = load_derivative_table(&patterns, &FitConfig::default()).unwrap();

    let out = dir.path().join("tables");
    let summary = export_tables(&table, &out).unwrap();
    assert_eq!(summary.files, 3 + 8 * 7);
    assert_eq!(summary.rows, table.entries());

    let layer_mem = fs::read_to_string(out.join("FitDerTableNew_LayerMem.txt")).unwrap();
    let lines: Vec<&str> = layer_mem.lines().collect();
    assert_eq!(lines.len(), 64);
    assert_eq!(lines[0b11_1100], "000000");
    assert_eq!(lines[0b11_0000], "000001");
    assert_eq!(lines[0], "111111");

    let disk_mem = fs::read_to_string(out.join("FitDerTableNew_DiskMem.txt")).unwrap();
    assert_eq!(disk_mem.lines().count(), 1024);
    assert_eq!(disk_mem.lines().next(), Some("0000000"));
    assert_eq!(disk_mem.lines().nth(1), Some("1111111"));

    let layer_disk_mem = fs::read_to_string(out.join("FitDerTableNew_LayerDiskMem.txt")).unwrap();
    let first = layer_disk_mem.lines().next().unwrap();
    assert_eq!(first, "000000000000000000");
    assert!(layer_disk_mem.lines().all(|l| l.len() == 18));
    assert!(layer_disk_mem
        .lines()
        .any(|line| line == "000000001111111111"));

    for seeding in ["L1L2", "L3L4", "L5L6", "D1D2", "D3D4", "D1L1", "D1L2"] {
        let rinv = fs::read_to_string(out.join(format!("FitDerTableNew_Rinvdphi_{seeding}.txt")))
            .unwrap();
        assert_eq!(rinv.lines().count(), table.entries(), "{seeding}");
        assert!(rinv.lines().all(|l| l.len() == 4 * 14));

        let z0 = fs::read_to_string(out.join(format!("FitDerTableNew_Z0dzordr_{seeding}.txt")))
            .unwrap();
        assert!(z0.lines().all(|l| l.len() == 4 * 16));
    }

    // No L5L6 row in the table: every input holds the saturated placeholder.
    let l5l6 = fs::read_to_string(out.join("FitDerTableNew_Tdphi_L5L6.txt")).unwrap();
    assert!(l5l6.lines().all(|l| l == "01111111111111".repeat(4)));
}

#[test]
fn test_event_file_round_trip_and_fit() {
    let dir = tempfile::tempdir().unwrap();
    let events_path = dir.path().join("events.json");
    write_events(&events_path, &[event(), event()]).unwrap();

    let records = read_events(&events_path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].units, event().units);
    assert_eq!(records[1].candidates[1].tcid, 2);

    let config = FitConfig::default().with_record_hit_patterns(true);
    let table = DerivativeTable::from_patterns(&config, PATTERNS).unwrap();
    let fitter = TrackFitter::new(Arc::new(table), config).unwrap();

    let mut events = records
        .into_iter()
        .map(EventRecord::into_event)
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let reports = process_events(&mut events, &fitter).unwrap();
    assert!(reports.iter().all(|r| r.units[0].tracks == vec![CandidateRef(1)]));

    let patterns_path = dir.path().join("recorded.txt");
    assert_eq!(write_hit_patterns(&patterns_path, &reports, true).unwrap(), 1);
    assert_eq!(
        fs::read_to_string(&patterns_path).unwrap(),
        "111100 0000000000 1\n"
    );

    let outputs: Vec<EventOutput> = events
        .into_iter()
        .zip(reports)
        .map(|(event, report)| EventOutput::new(event, report))
        .collect();
    let output_path = dir.path().join("fitted.json");
    write_outputs(&output_path, &outputs).unwrap();

    let text = fs::read_to_string(&output_path).unwrap();
    let decoded: Vec<EventOutput> = serde_json::from_str(&text).unwrap();
    assert_eq!(decoded.len(), 2);
    assert!(decoded[0].candidates[1].is_fit());
    assert!(!decoded[0].candidates[0].is_fit());
}

#[test]
fn test_single_event_object() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("event.json");
    fs::write(&path, serde_json::to_string(&event()).unwrap()).unwrap();
    let records = read_events(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].units[0].inputs.len(), 2);
}
