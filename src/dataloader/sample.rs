use std::fmt;
use std::path::PathBuf;

/// Binary class for the cataract task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    Normal = 0,
    Cataract = 1,
}

impl Label {
    pub const ALL: [Label; 2] = [Label::Normal, Label::Cataract];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Column order is `[normal, cataract]`.
    pub fn one_hot(self) -> [f32; 2] {
        match self {
            Label::Normal => [1.0, 0.0],
            Label::Cataract => [0.0, 1.0],
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Normal => write!(f, "normal(0)"),
            Label::Cataract => write!(f, "cataract(1)"),
        }
    }
}

/// Where a sample was derived from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleSource {
    CataractCorpus,
    OcularLeft,
    OcularRight,
}

impl fmt::Display for SampleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleSource::CataractCorpus => "cataract corpus",
            SampleSource::OcularLeft => "ocular left eye",
            SampleSource::OcularRight => "ocular right eye",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Sample {
    pub path: PathBuf,
    pub label: Label,
    pub source: SampleSource,
}

impl Sample {
    pub fn new(path: impl Into<PathBuf>, label: Label, source: SampleSource) -> Self {
        Sample {
            path: path.into(),
            label,
            source,
        }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ({})", self.path.display(), self.label, self.source)
    }
}

/// Ordered run of samples. Used both for the per-eye subsets fed to the
/// balancer and for the train/val/test partitions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subset {
    pub samples: Vec<Sample>,
}

impl Subset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Subset { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn count(&self, label: Label) -> usize {
        self.samples.iter().filter(|s| s.label == label).count()
    }

    /// `[normal, cataract]` counts.
    pub fn class_counts(&self) -> [usize; 2] {
        [self.count(Label::Normal), self.count(Label::Cataract)]
    }

    pub fn labels(&self) -> Vec<Label> {
        self.samples.iter().map(|s| s.label).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    /// Concatenate subsets in order.
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a Subset>) -> Subset {
        Subset {
            samples: parts
                .into_iter()
                .flat_map(|p| p.samples.iter().cloned())
                .collect(),
        }
    }
}

impl FromIterator<Sample> for Subset {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Subset {
            samples: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Subset {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_hot_columns_follow_label_index() {
        assert_eq!(Label::Normal.one_hot(), [1.0, 0.0]);
        assert_eq!(Label::Cataract.one_hot(), [0.0, 1.0]);
        assert_eq!(Label::Cataract.one_hot()[Label::Cataract.index()], 1.0);
    }

    #[test]
    fn class_counts_and_concat() {
        let a = Subset::new(vec![
            Sample::new("a.jpg", Label::Normal, SampleSource::CataractCorpus),
            Sample::new("b.jpg", Label::Cataract, SampleSource::CataractCorpus),
        ]);
        let b = Subset::new(vec![Sample::new(
            "c.jpg",
            Label::Cataract,
            SampleSource::OcularLeft,
        )]);
        let all = Subset::concat([&a, &b]);
        assert_eq!(all.len(), 3);
        assert_eq!(all.class_counts(), [1, 2]);
        assert_eq!(all.samples[2].path, PathBuf::from("c.jpg"));
    }
}
