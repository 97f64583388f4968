use rocket::Route;

mod elections;

pub fn routes() -> Vec<Route> {
    elections::routes()
}
