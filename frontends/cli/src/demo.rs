//! Demo content for `--offline`

use anyhow::Result;
use studyboard_api::{
    ConstructItem, Ordering, ResourceBase, Scale, ScaleLevel, Step, Study, StudyCondition,
    SurveyConstruct, SurveyPage,
};
use studyboard_client::FakeStudyApi;

fn page(id: &str, name: &str, step_id: &str, position: i64) -> SurveyPage {
    SurveyPage {
        base: ResourceBase::new(id, name),
        ordering: Ordering::at(position),
        step_id: step_id.to_string(),
        study_id: "S1".to_string(),
    }
}

fn item(id: &str, text: &str, position: i64) -> ConstructItem {
    ConstructItem {
        base: ResourceBase::new(id, ""),
        ordering: Ordering::at(position),
        construct_id: "SC1".to_string(),
        text: text.to_string(),
    }
}

/// A fake API holding one small study with its survey material
pub async fn seeded_api() -> Result<FakeStudyApi> {
    let api = FakeStudyApi::new();

    let mut pilot = ResourceBase::new("S1", "Pilot study");
    pilot.description = "Recommendation diversity pilot".to_string();
    api.seed([
        Study { base: pilot },
        Study {
            base: ResourceBase::new("S2", "Follow-up"),
        },
    ])
    .await?;

    api.seed([
        Step::new("ST1", "Welcome", "S1", 1),
        Step::new("ST2", "Consent", "S1", 2),
        Step::new("ST3", "Questionnaire", "S1", 3),
    ])
    .await?;
    api.seed([
        page("P1", "Background", "ST3", 1),
        page("P2", "Satisfaction", "ST3", 2),
    ])
    .await?;

    api.seed([StudyCondition {
        base: ResourceBase::new("C1", "Baseline"),
        study_id: "S1".to_string(),
        recommender_key: Some("popular".to_string()),
        participant_key: "baseline".to_string(),
        recommendation_count: 10,
        enabled: true,
    }])
    .await?;

    api.seed([SurveyConstruct {
        base: ResourceBase::new("SC1", "Perceived diversity"),
    }])
    .await?;
    api.seed([
        item("I1", "The recommendations covered many genres.", 1),
        item("I2", "The list felt repetitive.", 2),
    ])
    .await?;

    api.seed([Scale {
        base: ResourceBase::new("L1", "Agreement (5 point)"),
    }])
    .await?;
    api.seed([
        ScaleLevel::new("LV1", "L1", "Disagree", 1, 1),
        ScaleLevel::new("LV2", "L1", "Neutral", 3, 2),
        ScaleLevel::new("LV3", "L1", "Agree", 5, 3),
    ])
    .await?;

    Ok(api)
}
