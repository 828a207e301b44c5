use serde::Serialize;

use crate::error::RepurposeError;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, RepurposeError> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::to_pretty;
    use crate::entities::drug::DrugDirectory;
    use crate::entities::opportunity::{FilterState, OpportunityCatalog};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Demo<'a> {
        drug: &'a str,
        confidence: f64,
    }

    #[test]
    fn to_pretty_serializes_with_indentation() {
        let payload = Demo {
            drug: "Metformin",
            confidence: 0.87,
        };
        let json = to_pretty(&payload).expect("json");
        assert!(json.contains('\n'));
        assert!(json.contains("\"drug\": \"Metformin\""));
        assert!(json.contains("\"confidence\": 0.87"));
    }

    #[test]
    fn json_render_keeps_dataset_field_names() {
        let directory = DrugDirectory::bundled().expect("directory");
        let aspirin = directory.lookup("aspirin").expect("aspirin");
        let json = to_pretty(aspirin).expect("drug json");
        assert!(json.contains("\"tradeName\""));
        assert!(json.contains("\"approvedFor\""));

        let catalog = OpportunityCatalog::bundled().expect("catalog");
        let records = catalog.get_opportunities("metformin", &FilterState::default());
        let json = to_pretty(&records).expect("opportunity json");
        assert!(json.contains("\"drivingEffect\""));
        assert!(json.contains("\"patentStatus\""));
    }
}
