#![allow(dead_code)]

use std::path::{Path, PathBuf};

use seqdag::fs::mock::MockFileSystem;

/// A MiSeq-style run directory with one alignment and its experiment
/// metadata, writable to a real directory or a [`MockFileSystem`].
#[derive(Debug, Clone)]
pub struct RunFixture {
    pub dir_name: String,
    pub run_id: String,
    pub experiment: String,
    /// `(sample, project, tasks)` rows of the experiment metadata.
    pub samples: Vec<(String, String, String)>,
    pub complete: bool,
    pub checkpoint: u32,
}

impl RunFixture {
    pub fn new(dir_name: &str, run_id: &str, experiment: &str) -> Self {
        Self {
            dir_name: dir_name.to_string(),
            run_id: run_id.to_string(),
            experiment: experiment.to_string(),
            samples: Vec::new(),
            complete: true,
            checkpoint: 3,
        }
    }

    pub fn sample(mut self, sample: &str, project: &str, tasks: &str) -> Self {
        self.samples
            .push((sample.to_string(), project.to_string(), tasks.to_string()));
        self
    }

    pub fn incomplete(mut self) -> Self {
        self.complete = false;
        self
    }

    pub fn checkpoint(mut self, value: u32) -> Self {
        self.checkpoint = value;
        self
    }

    pub fn alignment_rel(&self) -> PathBuf {
        PathBuf::from(&self.dir_name)
            .join("Data")
            .join("Intensities")
            .join("BaseCalls")
            .join("Alignment")
    }

    /// Files of the run tree, relative to the runs root.
    pub fn run_files(&self) -> Vec<(PathBuf, String)> {
        let run = PathBuf::from(&self.dir_name);
        let basecalls = run.join("Data").join("Intensities").join("BaseCalls");
        let alignment = self.alignment_rel();

        let mut files = vec![(
            run.join("RunInfo.xml"),
            format!(
                "<?xml version=\"1.0\"?>\n<RunInfo Version=\"2\">\n  <Run Id=\"{}\" Number=\"1\">\n    <Flowcell>000000000-ABCDE</Flowcell>\n  </Run>\n</RunInfo>\n",
                self.run_id
            ),
        )];
        if self.complete {
            files.push((run.join("RTAComplete.txt"), "done\n".to_string()));
        }
        files.push((alignment.join("Checkpoint.txt"), format!("{}\n", self.checkpoint)));
        files.push((alignment.join("SampleSheetUsed.csv"), self.sample_sheet()));
        for (i, (sample, _, _)) in self.samples.iter().enumerate() {
            for read in ["R1", "R2"] {
                files.push((
                    basecalls.join(format!("{sample}_S{}_L001_{read}_001.fastq.gz", i + 1)),
                    format!("@{sample}:{read}\nACGT\n+\nIIII\n"),
                ));
            }
        }
        files
    }

    pub fn sample_sheet(&self) -> String {
        let mut text = format!(
            "[Header]\nIEMFileVersion,4\nExperiment Name,{}\n\n[Reads]\n151\n151\n\n[Data]\nSample_ID,Sample_Name\n",
            self.experiment
        );
        for (sample, _, _) in &self.samples {
            text.push_str(&format!("{sample},{sample}\n"));
        }
        text
    }

    pub fn metadata_csv(&self) -> String {
        let mut text = "Sample_Name,Project,Contacts,Tasks\n".to_string();
        for (sample, project, tasks) in &self.samples {
            text.push_str(&format!(
                "{sample},{project},Jane Doe <jane@example.org>,{tasks}\n"
            ));
        }
        text
    }

    /// Write the run under `runs` and its metadata under `experiments`.
    pub fn write(&self, runs: &Path, experiments: &Path) -> std::io::Result<PathBuf> {
        for (rel, content) in self.run_files() {
            let path = runs.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        let md_dir = experiments.join(&self.experiment);
        std::fs::create_dir_all(&md_dir)?;
        std::fs::write(md_dir.join("metadata.csv"), self.metadata_csv())?;
        Ok(runs.join(&self.dir_name))
    }

    /// Same tree inside a mock filesystem.
    pub fn add_to(&self, fs: &MockFileSystem, runs: &Path, experiments: &Path) -> PathBuf {
        fs.add_dir(runs);
        for (rel, content) in self.run_files() {
            fs.add_file(runs.join(rel), content);
        }
        fs.add_file(
            experiments.join(&self.experiment).join("metadata.csv"),
            self.metadata_csv(),
        );
        runs.join(&self.dir_name)
    }

    /// Work directory name discovery gives the project.
    pub fn work_dir_name(&self, project: &str) -> String {
        format!("{}-{}-{}", self.run_id, self.experiment, project)
    }
}
