use std::io::Read;
use std::path::{Path, PathBuf};

use super::config::SheetColumns;
use super::error::{PipelineError, Result};
use super::sample::{Label, Sample, SampleSource, Subset};

/// Per-eye subsets derived from one spreadsheet.
#[derive(Clone, Debug, Default)]
pub struct EyeSubsets {
    pub left: Subset,
    pub right: Subset,
}

/// A keyword field counts as cataract when it mentions the word, in any case.
pub fn has_cataract_mentioned(keywords: &str) -> Label {
    if keywords.to_lowercase().contains("cataract") {
        Label::Cataract
    } else {
        Label::Normal
    }
}

pub struct SheetLabelDeriver {
    path: PathBuf,
    image_root: PathBuf,
    columns: SheetColumns,
}

struct ColumnIndices {
    left_fundus: usize,
    right_fundus: usize,
    left_keywords: usize,
    right_keywords: usize,
}

impl SheetLabelDeriver {
    pub fn new(path: &Path, image_root: &Path, columns: SheetColumns) -> Result<Self> {
        if !path.is_file() {
            return Err(PipelineError::DataSourceNotFound(vec![path.to_path_buf()]));
        }
        Ok(SheetLabelDeriver {
            path: path.to_owned(),
            image_root: image_root.to_owned(),
            columns,
        })
    }

    pub fn derive(&self) -> Result<EyeSubsets> {
        let file = std::fs::File::open(&self.path)?;
        derive_from_reader(file, &self.image_root, &self.columns)
    }
}

/// Rows are read once. Each row yields one left and one right sample, each
/// labelled from its own eye's keywords.
pub fn derive_from_reader<R: Read>(reader: R, image_root: &Path, columns: &SheetColumns) -> Result<EyeSubsets> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Fields)
        .from_reader(reader);

    let indices = column_indices(reader.headers()?, columns)?;
    let mut subsets = EyeSubsets::default();

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let eyes = [
            (indices.left_fundus, indices.left_keywords, SampleSource::OcularLeft),
            (indices.right_fundus, indices.right_keywords, SampleSource::OcularRight),
        ];

        for (file_idx, keyword_idx, source) in eyes {
            let filename = field(file_idx);
            if filename.is_empty() {
                tracing::warn!(row = row + 2, %source, "empty fundus filename, skipping eye");
                continue;
            }
            let sample = Sample::new(
                image_root.join(filename),
                has_cataract_mentioned(field(keyword_idx)),
                source,
            );
            match source {
                SampleSource::OcularLeft => subsets.left.samples.push(sample),
                _ => subsets.right.samples.push(sample),
            }
        }
    }

    tracing::debug!(
        left = subsets.left.len(),
        right = subsets.right.len(),
        "derived labels from ocular spreadsheet"
    );

    Ok(subsets)
}

fn column_indices(headers: &csv::StringRecord, columns: &SheetColumns) -> Result<ColumnIndices> {
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| PipelineError::InvalidConfig(format!("spreadsheet has no column named {name:?}")))
    };
    Ok(ColumnIndices {
        left_fundus: find(&columns.left_fundus)?,
        right_fundus: find(&columns.right_fundus)?,
        left_keywords: find(&columns.left_keywords)?,
        right_keywords: find(&columns.right_keywords)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_matching() {
        assert_eq!(has_cataract_mentioned("mild cataract, early stage"), Label::Cataract);
        assert_eq!(has_cataract_mentioned("normal fundus"), Label::Normal);
        assert_eq!(has_cataract_mentioned(""), Label::Normal);
        assert_eq!(has_cataract_mentioned("Cataract"), Label::Cataract);
        assert_eq!(has_cataract_mentioned("moderate non proliferative retinopathy,CATARACT"), Label::Cataract);
    }

    #[test]
    fn each_eye_labelled_independently() {
        let sheet = "\
ID,Patient Age,Left-Fundus,Right-Fundus,Left-Diagnostic Keywords,Right-Diagnostic Keywords
0,69,0_left.jpg,0_right.jpg,cataract,normal fundus
1,57,1_left.jpg,1_right.jpg,normal fundus,normal fundus
2,42,2_left.jpg,2_right.jpg,\"laser spot, moderate non proliferative retinopathy\",mild Cataract
";
        let subsets = derive_from_reader(sheet.as_bytes(), Path::new("/od/images"), &SheetColumns::default()).unwrap();

        assert_eq!(subsets.left.len(), 3);
        assert_eq!(subsets.right.len(), 3);
        assert_eq!(subsets.left.labels(), vec![Label::Cataract, Label::Normal, Label::Normal]);
        assert_eq!(subsets.right.labels(), vec![Label::Normal, Label::Normal, Label::Cataract]);
        assert_eq!(subsets.left.samples[0].path, PathBuf::from("/od/images/0_left.jpg"));
        assert_eq!(subsets.right.samples[2].source, SampleSource::OcularRight);
    }

    #[test]
    fn missing_column_is_reported() {
        let sheet = "Left-Fundus,Right-Fundus\na.jpg,b.jpg\n";
        let err = derive_from_reader(sheet.as_bytes(), Path::new("."), &SheetColumns::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(msg) if msg.contains("Left-Diagnostic Keywords")));
    }
}
