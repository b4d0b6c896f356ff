use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;
use topogen::generate::write_batch;
use topogen::sequence::{artifact_files, encode, parse_artifact, read_artifact};
use topogen::{
    BatchConfig, BigramOracle, DecodeConfig, TokenId, TokenKind, UniformOracle, Vocabulary,
    check_sequence, generate_batch,
};

/// Two transistors sharing a net, closed on ground.
const MIRROR: &str = "CIRCUIT_Mirror->VSS->M_BS->NM1->M_DG->NET1->M_DG->NM2->M_BS->VSS->TRUNCATE";

// Helper function to write an artifact into a fresh directory
fn create_artifact(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("Failed to write artifact");
    path
}

// Helper function to run the topogen binary
fn run_topogen(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_topogen"))
        .args(args)
        .output()
        .expect("Failed to run topogen")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// Helper function counting the distinct device instances of a sequence
fn distinct_devices(vocab: &Vocabulary, ids: &[TokenId]) -> usize {
    let mut devices: Vec<_> = ids
        .iter()
        .filter(|&&id| matches!(vocab.kind(id), TokenKind::Device { .. }))
        .collect();
    devices.sort();
    devices.dedup();
    devices.len()
}

#[cfg(test)]
mod library_tests {
    use super::*;

    /// Generated batches survive the trip to disk and back and pass the rule check.
    #[test]
    fn test_generate_write_and_reaudit() {
        let vocab = Vocabulary::analog().unwrap();
        let oracle = UniformOracle::new(vocab.len());
        let batch = BatchConfig {
            max_attempts: Some(200),
            seed: 42,
            ..BatchConfig::default()
        };
        let report = generate_batch(
            &vocab,
            &oracle,
            vocab.circuit_type("Opamp").unwrap(),
            5,
            &DecodeConfig::default(),
            &batch,
        )
        .unwrap();

        assert!(!report.accepted.is_empty(), "{:?}", report.discarded);
        assert!(report.accepted.len() <= 5);
        assert_eq!(
            report.attempted,
            report.accepted.len() + report.discarded_total()
        );

        let temp_dir = TempDir::new().unwrap();
        let dir = write_batch(&vocab, &report, temp_dir.path()).unwrap();
        let files = artifact_files(&dir).unwrap();
        assert_eq!(files.len(), report.accepted.len());

        for (path, expected) in files.iter().zip(report.accepted.iter()) {
            let ids = read_artifact(&vocab, path).unwrap();
            assert_eq!(&ids, expected);
            let erc = check_sequence(&vocab, &ids);
            assert!(erc.is_clean(), "{}: {:?}", path.display(), erc.violations);
        }
    }

    /// A model trained on a two-transistor mirror gets it back through the grammar.
    #[test]
    fn test_learned_multi_device_circuit() {
        let vocab = Vocabulary::analog().unwrap();
        let mirror = encode(&vocab, &parse_artifact(MIRROR)).unwrap();
        let oracle = BigramOracle::from_sequences(vocab.len(), &vec![mirror.clone(); 200]);
        let decode = DecodeConfig {
            temperature: 0.0,
            ..DecodeConfig::default()
        };
        let batch = BatchConfig {
            max_attempts: Some(10),
            seed: 3,
            ..BatchConfig::default()
        };
        let report = generate_batch(
            &vocab,
            &oracle,
            vocab.circuit_type("Mirror").unwrap(),
            3,
            &decode,
            &batch,
        )
        .unwrap();

        assert_eq!(report.accepted.len(), 3);
        assert_eq!(report.attempted, 3);
        for tokens in report.accepted.iter() {
            assert_eq!(tokens, &mirror);
            assert_eq!(distinct_devices(&vocab, tokens), 2);
            assert!(check_sequence(&vocab, tokens).is_clean());
        }
    }

    /// Sampling with a warm temperature still yields circuits of several devices.
    #[test]
    fn test_sampled_circuits_grow_past_one_device() {
        let vocab = Vocabulary::analog().unwrap();
        let mirror = encode(&vocab, &parse_artifact(MIRROR)).unwrap();
        let oracle = BigramOracle::from_sequences(vocab.len(), &vec![mirror; 200]);
        let batch = BatchConfig {
            max_attempts: Some(200),
            seed: 11,
            ..BatchConfig::default()
        };
        let report = generate_batch(
            &vocab,
            &oracle,
            vocab.circuit_type("Mirror").unwrap(),
            20,
            &DecodeConfig::default(),
            &batch,
        )
        .unwrap();

        assert!(!report.accepted.is_empty());
        assert!(
            report
                .accepted
                .iter()
                .any(|tokens| distinct_devices(&vocab, tokens) > 1)
        );
        for tokens in report.accepted.iter() {
            assert!(check_sequence(&vocab, tokens).is_clean());
        }
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    #[test]
    fn test_generate_writes_per_type_directories() {
        let output_dir = TempDir::new().unwrap();
        let output = run_topogen(&[
            "generate",
            "--circuit",
            "Opamp",
            "--circuit",
            "CIRCUIT_LDO",
            "-n",
            "3",
            "--max-attempts",
            "200",
            "--seed",
            "7",
            "--output",
            output_dir.path().to_str().unwrap(),
        ]);

        assert!(
            output.status.success(),
            "Command should succeed. stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );

        let vocab = Vocabulary::analog().unwrap();
        for tag in ["CIRCUIT_Opamp", "CIRCUIT_LDO"] {
            let dir = output_dir.path().join(format!("Inference_{}_masked", tag));
            assert!(dir.is_dir(), "{} should exist", dir.display());
            let files = artifact_files(&dir).unwrap();
            assert!(!files.is_empty(), "no {} artifact accepted", tag);
            assert!(files.len() <= 3);
            for path in files {
                let ids = read_artifact(&vocab, &path).unwrap();
                assert_eq!(ids[0], vocab.id_of(tag).unwrap());
                assert!(check_sequence(&vocab, &ids).is_clean());
            }
            assert!(stdout(&output).contains(tag));
        }
    }

    #[test]
    fn test_generate_from_corpus() {
        let corpus = TempDir::new().unwrap();
        for i in 1..=150 {
            create_artifact(corpus.path(), &format!("run{}.txt", i), MIRROR);
        }
        create_artifact(corpus.path(), "legacy.txt", "VSS->FLUX_CAPACITOR");
        let output_dir = TempDir::new().unwrap();
        let report = output_dir.path().join("summary.txt");

        let output = run_topogen(&[
            "generate",
            "--corpus",
            corpus.path().to_str().unwrap(),
            "--circuit",
            "Mirror",
            "-n",
            "2",
            "--max-attempts",
            "20",
            "--temperature",
            "0",
            "--output",
            output_dir.path().to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ]);

        assert!(
            output.status.success(),
            "Command should succeed. stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        let summary = fs::read_to_string(&report).unwrap();
        assert!(summary.contains("CIRCUIT_Mirror"));
        assert!(summary.contains("Attempted"));

        let dir = output_dir.path().join("Inference_CIRCUIT_Mirror_masked");
        for run in ["run1.txt", "run2.txt"] {
            assert_eq!(fs::read_to_string(dir.join(run)).unwrap(), MIRROR);
        }
    }

    #[test]
    fn test_generate_rejects_unknown_type_and_empty_corpus() {
        let output_dir = TempDir::new().unwrap();
        let output = run_topogen(&[
            "generate",
            "--circuit",
            "Toaster",
            "--output",
            output_dir.path().to_str().unwrap(),
        ]);
        assert!(!output.status.success());

        let corpus = TempDir::new().unwrap();
        let output = run_topogen(&[
            "generate",
            "--corpus",
            corpus.path().to_str().unwrap(),
            "--output",
            output_dir.path().to_str().unwrap(),
        ]);
        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("No artifacts"));

        create_artifact(corpus.path(), "run1.txt", "VSS->FLUX_CAPACITOR");
        let output = run_topogen(&[
            "generate",
            "--corpus",
            corpus.path().to_str().unwrap(),
            "--output",
            output_dir.path().to_str().unwrap(),
        ]);
        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("could be read"));
    }

    #[test]
    fn test_check_reports_violations() {
        let input = TempDir::new().unwrap();
        create_artifact(input.path(), "good.txt", MIRROR);
        create_artifact(input.path(), "bad.txt", "CIRCUIT_Opamp->VSS->M_S->NM1");
        create_artifact(input.path(), "garbage.txt", "VSS->FLUX_CAPACITOR");
        let report_dir = TempDir::new().unwrap();
        let report = report_dir.path().join("erc.rpt");

        let output = run_topogen(&[
            "check",
            input.path().to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ]);
        assert!(
            output.status.success(),
            "Command should succeed. stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );

        let text = stdout(&output);
        assert!(text.contains("artifacts"));
        assert!(text.contains("unreadable"));

        let details = fs::read_to_string(&report).unwrap();
        assert!(details.contains("bad.txt"));
        assert!(details.contains("garbage.txt"));
        assert!(!details.contains("good.txt"));

        let strict = run_topogen(&["check", input.path().to_str().unwrap(), "--strict"]);
        assert!(!strict.status.success());
    }

    #[test]
    fn test_check_single_clean_file() {
        let input = TempDir::new().unwrap();
        let path = create_artifact(input.path(), "run1.txt", MIRROR);
        let output = run_topogen(&["check", path.to_str().unwrap(), "--strict"]);
        assert!(
            output.status.success(),
            "Command should succeed. stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    #[test]
    fn test_graph_writes_dot() {
        let input = TempDir::new().unwrap();
        let path = create_artifact(input.path(), "run1.txt", MIRROR);
        let dot = input.path().join("run1.dot");

        let output = run_topogen(&[
            "graph",
            path.to_str().unwrap(),
            "-o",
            dot.to_str().unwrap(),
        ]);
        assert!(
            output.status.success(),
            "Command should succeed. stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );

        let content = fs::read_to_string(&dot).unwrap();
        assert!(content.contains("digraph"));
        assert!(content.contains("NM1"));
        assert!(content.contains("NET1"));
    }

    #[test]
    fn test_vocab_filters_by_category() {
        let output = run_topogen(&["vocab", "--category", "net"]);
        assert!(output.status.success());
        let text = stdout(&output);
        assert!(text.contains("NET50"));
        assert!(!text.contains("NM1"));
    }
}
