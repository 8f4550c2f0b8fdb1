mod check;
mod events;
mod health;
mod results;

macros_utils::routes! {
    load health,
    load results,
    load check,
    load events,
}
