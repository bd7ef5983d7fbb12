//! Where each sample's files live.

use ms_config::PathsConfig;
use ms_types::{SampleIdentity, SearchEngine};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Layout {
    raw_root: PathBuf,
    data_root: PathBuf,
}

impl Layout {
    pub fn new(paths: &PathsConfig) -> Self {
        Layout {
            raw_root: paths.raw_root.clone(),
            data_root: paths.data_root.clone(),
        }
    }

    /// `<raw_root>/<project>/<sample>.raw`
    pub fn raw_file(&self, id: &SampleIdentity) -> PathBuf {
        self.raw_root
            .join(&id.project)
            .join(format!("{}.raw", id.sample))
    }

    /// `<data_root>/<project>`
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.data_root.join(project)
    }

    fn sample_file(&self, id: &SampleIdentity, suffix: &str) -> PathBuf {
        self.project_dir(&id.project)
            .join(format!("{}{suffix}", id.sample))
    }

    /// Peak list written by the conversion tool.
    pub fn mgf(&self, id: &SampleIdentity) -> PathBuf {
        self.sample_file(id, ".mgf")
    }

    pub fn tandem_config(&self, id: &SampleIdentity) -> PathBuf {
        self.sample_file(id, ".tconf.xml")
    }

    pub fn search_output(&self, engine: SearchEngine, id: &SampleIdentity) -> PathBuf {
        match engine {
            SearchEngine::Tandem => self.sample_file(id, ".tandem.xml"),
            SearchEngine::Mascot => self.sample_file(id, ".dat"),
        }
    }

    /// Engines whose output for `id` is on disk.
    pub fn finished_searches(&self, id: &SampleIdentity) -> Vec<SearchEngine> {
        SearchEngine::ALL
            .into_iter()
            .filter(|&e| self.search_output(e, id).exists())
            .collect()
    }

    /// Job descriptor for the aggregation tool.
    pub fn scaffold_descriptor(&self, project: &str) -> PathBuf {
        self.project_dir(project)
            .join(format!("{project}_scaffold.scafml"))
    }
}

/// `path` with `suffix` appended to its final component.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = Layout::new(&PathsConfig {
            raw_root: "/r".into(),
            data_root: "/d".into(),
            ..Default::default()
        });
        let id = SampleIdentity::new("P1", "S1");
        assert_eq!(layout.raw_file(&id), Path::new("/r/P1/S1.raw"));
        assert_eq!(layout.mgf(&id), Path::new("/d/P1/S1.mgf"));
        assert_eq!(layout.tandem_config(&id), Path::new("/d/P1/S1.tconf.xml"));
        assert_eq!(
            layout.search_output(SearchEngine::Tandem, &id),
            Path::new("/d/P1/S1.tandem.xml")
        );
        assert_eq!(
            layout.search_output(SearchEngine::Mascot, &id),
            Path::new("/d/P1/S1.dat")
        );
        assert_eq!(
            layout.scaffold_descriptor("P1"),
            Path::new("/d/P1/P1_scaffold.scafml")
        );
        assert_eq!(
            with_suffix(Path::new("/p/trypsin"), ".R"),
            Path::new("/p/trypsin.R")
        );
    }
}
