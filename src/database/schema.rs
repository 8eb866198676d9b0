// Defines database schema for diesel to use

pub mod sql_types {
    #[derive(diesel::query_builder::QueryId, diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "token_scope"))]
    pub struct TokenScope;
}

diesel::table! {
    widgets (id) {
        id -> Int4,
        name -> Text,
        description -> Text,
        inventory_level -> Int4,
        price -> Int4,
        image -> Nullable<Text>,
        is_recurring -> Bool,
        plan_id -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    customers (id) {
        id -> Int4,
        first_name -> Text,
        last_name -> Text,
        email -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    transactions (id) {
        id -> Int4,
        amount -> Int4,
        currency -> Text,
        last_four -> Text,
        bank_return_code -> Text,
        expiry_month -> Int4,
        expiry_year -> Int4,
        payment_intent -> Text,
        payment_method -> Text,
        transaction_status_id -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    orders (id) {
        id -> Int4,
        widget_id -> Int4,
        transaction_id -> Int4,
        customer_id -> Int4,
        status_id -> Int4,
        quantity -> Int4,
        amount -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    users (id) {
        id -> Int4,
        first_name -> Text,
        last_name -> Text,
        email -> Text,
        password -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use super::sql_types::TokenScope;

    tokens (id) {
        id -> Int4,
        user_id -> Int4,
        name -> Text,
        email -> Text,
        token_hash -> Bytea,
        scope -> TokenScope,
        expiry -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(orders -> widgets (widget_id));
diesel::joinable!(orders -> transactions (transaction_id));
diesel::joinable!(orders -> customers (customer_id));
diesel::joinable!(tokens -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    widgets,
    customers,
    transactions,
    orders,
    users,
    tokens,
);
