use rocket::{
    serde::json::{self, Json},
    Route, State,
};

use crate::ballot::BallotEngine;
use crate::error::{Error, Result};
use crate::logging::RequestId;
use crate::model::api::{
    ballot::{Ballot, BallotRequest},
    election::ElectionView,
    tally::TallyView,
};
use crate::store::DocumentStore;

pub fn routes() -> Vec<Route> {
    routes![cast_vote, get_election, get_tally]
}

#[patch("/elections/vote", data = "<request>")]
async fn cast_vote(
    request: std::result::Result<Json<BallotRequest>, json::Error<'_>>,
    engine: &State<BallotEngine>,
    id: &RequestId,
) -> Result<Json<TallyView>> {
    let ballot: Ballot = request
        .map_err(|e| Error::MalformedRequest(e.to_string()))?
        .into_inner()
        .try_into()?;
    debug!(
        "req{id} casting ballot of student {} in election {}",
        ballot.student_id, ballot.election_id
    );
    let tally = engine.cast_vote(&ballot).await?;
    Ok(Json(tally))
}

#[get("/elections/<election_id>")]
async fn get_election(election_id: &str, engine: &State<BallotEngine>) -> Result<Json<ElectionView>> {
    let election = engine
        .store()
        .election(election_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))?;
    Ok(Json(election.into()))
}

#[get("/elections/<election_id>/tally")]
async fn get_tally(election_id: &str, engine: &State<BallotEngine>) -> Result<Json<TallyView>> {
    let election = engine
        .store()
        .election(election_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))?;
    Ok(Json(TallyView::project(&election)))
}
