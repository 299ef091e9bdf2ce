// Database schema definitions
diesel::table! {
    role (id) {
        id -> Int4,
        name -> Varchar,
        description -> Text,
    }
}

diesel::table! {
    permission (id) {
        id -> Int4,
        role_id -> Int4,
        page -> Varchar,
        can_view -> Bool,
        can_add -> Bool,
        can_edit -> Bool,
        can_delete -> Bool,
        is_login_page -> Bool,
    }
}

diesel::table! {
    app_user (id) {
        id -> Int4,
        email -> Varchar,
        username -> Varchar,
        first_name -> Varchar,
        last_name -> Varchar,
        avatar -> Nullable<Varchar>,
        role_id -> Nullable<Int4>,
        is_superuser -> Bool,
        is_staff -> Bool,
        is_active -> Bool,
        password_hash -> Varchar,
        date_joined -> Timestamp,
        last_login -> Nullable<Timestamp>,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    area (id) {
        id -> Int4,
        area_name -> Varchar,
    }
}

diesel::table! {
    complaint (id) {
        id -> Int4,
        area_id -> Int4,
        serial_no -> Varchar,
        complaint_type -> Varchar,
        ticket_number -> Varchar,
        name -> Varchar,
        date -> Date,
        address -> Text,
        phone_number -> Varchar,
        department -> Varchar,
        status -> Varchar,
        created_by -> Nullable<Int4>,
    }
}

diesel::table! {
    connection_type (id) {
        id -> Int4,
        name -> Varchar,
        created_at -> Timestamp,
    }
}

diesel::table! {
    connection (id) {
        id -> Int4,
        name -> Varchar,
        address -> Text,
        file_number -> Varchar,
        area -> Varchar,
        connection_type_id -> Int4,
        status -> Varchar,
        created_by -> Nullable<Int4>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    conversion (id) {
        id -> Int4,
        name -> Varchar,
        address -> Text,
        file_number -> Varchar,
        area -> Varchar,
        from_connection_type_id -> Int4,
        to_connection_type_id -> Int4,
        created_by -> Nullable<Int4>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    valve (id) {
        id -> Int4,
        name -> Varchar,
        size -> Varchar,
        full_open_condition -> Varchar,
        current_condition -> Varchar,
        remarks -> Text,
        previous_position -> Nullable<Varchar>,
        latitude -> Nullable<Float8>,
        longitude -> Nullable<Float8>,
        location_type -> Varchar,
        location_link -> Nullable<Varchar>,
        created_by -> Nullable<Int4>,
    }
}

diesel::table! {
    valve_log (id) {
        id -> Int4,
        valve_id -> Int4,
        user_id -> Nullable<Int4>,
        changed_field -> Varchar,
        old_value -> Text,
        new_value -> Text,
        timestamp -> Timestamp,
    }
}

diesel::table! {
    expiring_entry (key) {
        key -> Varchar,
        value -> Text,
        expires_at -> Timestamp,
    }
}

diesel::joinable!(permission -> role (role_id));
diesel::joinable!(app_user -> role (role_id));
diesel::joinable!(complaint -> area (area_id));
diesel::joinable!(connection -> connection_type (connection_type_id));
diesel::joinable!(valve_log -> valve (valve_id));

diesel::allow_tables_to_appear_in_same_query!(
    role, permission, app_user, area, complaint,
    connection_type, connection, conversion, valve, valve_log,
    expiring_entry,
);
