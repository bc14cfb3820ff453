//! Content catalog: every message the dispatcher knows how to send.
//!
//! A [`ContentKey`] selects a category, a delivery route, the content fields
//! the message cannot be rendered without, and a template per language.
//! Templates use `{{placeholder}}` tokens resolved by [`crate::render`].

use crate::client::Language;

define_str_enum! {
    /// Symbolic identifier of a message template.
    ContentKey ("content key") {
        NewMember = "newMember",
        NewControlMember = "newControlMember",
        NewMemberNudge = "newMemberNudge",
        NewRegisteredMember = "newRegisteredMember",
        NewRegisteredMemberNudge = "newRegisteredMemberNudge",
        NewRegisteredMemberLongNudge = "newRegisteredMemberLongNudge",
        LogReminder = "logReminder",
        AppointmentScheduledMember = "appointmentScheduledMember",
        AppointmentScheduledUser = "appointmentScheduledUser",
        AppointmentReminder = "appointmentReminder",
        AppointmentLongReminder = "appointmentLongReminder",
        AppointmentRequest = "appointmentRequest",
        NewChatMessageFromUser = "newChatMessageFromUser",
        NewChatMessageFromMember = "newChatMessageFromMember",
        MemberNotFeelingWellMessage = "memberNotFeelingWellMessage",
        JournalContent = "journalContent",
        AssessmentSubmitAlert = "assessmentSubmitAlert",
        CreateTodo = "createTodo",
        UpdateTodo = "updateTodo",
        DeleteTodo = "deleteTodo",
        AddCaregiverDetails = "addCaregiverDetails",
        SetCallPermissions = "setCallPermissions",
        CustomContent = "customContent",
        CallOrVideo = "callOrVideo",
        CancelNotify = "cancelNotify",
    }
}

define_str_enum! {
    /// Broad grouping of content keys, used by preference gates.
    ContentCategory ("content category") {
        Registration = "registration",
        Appointment = "appointment",
        Chat = "chat",
        Journal = "journal",
        Assessment = "assessment",
        Todo = "todo",
        External = "external",
        Custom = "custom",
    }
}

define_str_enum! {
    /// Static per-content-key channel restriction.
    DeliveryRoute ("delivery route") {
        /// Chat when a channel exists, otherwise push or SMS.
        Standard = "standard",
        /// Always SMS, regardless of chat channel or app install.
        SmsOnly = "smsOnly",
        /// Always mobile push.
        PushOnly = "pushOnly",
    }
}

define_str_enum! {
    /// Optional content fields a dispatch may carry.
    ContentField ("content field") {
        Content = "content",
        PeerId = "peerId",
        AppointmentId = "appointmentId",
        AppointmentTime = "appointmentTime",
        ScheduleLink = "scheduleLink",
        Path = "path",
        SendBirdChannelUrl = "sendBirdChannelUrl",
        JournalImageDownloadLink = "journalImageDownloadLink",
        JournalAudioDownloadLink = "journalAudioDownloadLink",
        AssessmentName = "assessmentName",
        AssessmentScore = "assessmentScore",
    }
}

/// Catalog entry for one content key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentEntry {
    pub category: ContentCategory,
    pub route: DeliveryRoute,
    /// Fields that must be present on the dispatch for delivery to proceed.
    pub required: &'static [ContentField],
    pub en: &'static str,
    pub es: &'static str,
}

impl ContentEntry {
    /// The template for `language`.
    pub fn template(&self, language: Language) -> &'static str {
        match language {
            Language::En => self.en,
            Language::Es => self.es,
        }
    }
}

const APPOINTMENT_TIME: &[ContentField] = &[ContentField::AppointmentTime];

impl ContentKey {
    /// Look up the catalog entry for this key.
    pub fn entry(self) -> ContentEntry {
        use ContentCategory as C;
        use DeliveryRoute as R;

        let (category, route, required, en, es): (_, _, &'static [ContentField], _, _) = match self {
            ContentKey::NewMember => (
                C::Registration,
                R::SmsOnly,
                &[],
                "Hello {{member.firstName}}, welcome to {{org.name}}! Your coach is ready \
                 for you. Download the app to get started: {{downloadLink}}",
                "Hola {{member.firstName}}, ¡bienvenido a {{org.name}}! Tu coach te está \
                 esperando. Descarga la app para comenzar: {{downloadLink}}",
            ),
            ContentKey::NewControlMember => (
                C::Registration,
                R::SmsOnly,
                &[],
                "Hello {{member.firstName}}, thank you for joining {{org.name}}'s program.",
                "Hola {{member.firstName}}, gracias por unirte al programa de {{org.name}}.",
            ),
            ContentKey::NewMemberNudge => (
                C::Registration,
                R::SmsOnly,
                &[],
                "Hi {{member.firstName}}, {{user.firstName}} here. I'm still waiting to connect \
                 with you. Download the app: {{downloadLink}}",
                "Hola {{member.firstName}}, soy {{user.firstName}}. Sigo esperando conectar \
                 contigo. Descarga la app: {{downloadLink}}",
            ),
            ContentKey::NewRegisteredMember => (
                C::Registration,
                R::Standard,
                &[],
                "Welcome {{member.firstName}}! {{user.firstName}} from {{org.name}} is looking \
                 forward to working with you.",
                "¡Bienvenido {{member.firstName}}! {{user.firstName}} de {{org.name}} espera \
                 trabajar contigo.",
            ),
            ContentKey::NewRegisteredMemberNudge => (
                C::Registration,
                R::Standard,
                &[],
                "Hi {{member.firstName}}, log in to the app to see what {{user.firstName}} \
                 has prepared for you.",
                "Hola {{member.firstName}}, inicia sesión en la app para ver lo que \
                 {{user.firstName}} preparó para ti.",
            ),
            ContentKey::NewRegisteredMemberLongNudge => (
                C::Registration,
                R::Standard,
                &[],
                "Hi {{member.firstName}}, it's been a while. {{user.firstName}} is here \
                 whenever you're ready.",
                "Hola {{member.firstName}}, ha pasado un tiempo. {{user.firstName}} está aquí \
                 cuando estés listo.",
            ),
            ContentKey::LogReminder => (
                C::Registration,
                R::Standard,
                &[],
                "Hi {{member.firstName}}, don't forget to log how you're feeling today.",
                "Hola {{member.firstName}}, no olvides registrar cómo te sientes hoy.",
            ),
            ContentKey::AppointmentScheduledMember => (
                C::Appointment,
                R::Standard,
                APPOINTMENT_TIME,
                "Your appointment with {{user.firstName}} is scheduled for {{appointmentTime}}.",
                "Tu cita con {{user.firstName}} está programada para {{appointmentTime}}.",
            ),
            ContentKey::AppointmentScheduledUser => (
                C::Appointment,
                R::Standard,
                APPOINTMENT_TIME,
                "{{member.firstName}} {{member.lastName}} scheduled an appointment for \
                 {{appointmentTime}}.",
                "{{member.firstName}} {{member.lastName}} programó una cita para \
                 {{appointmentTime}}.",
            ),
            ContentKey::AppointmentReminder => (
                C::Appointment,
                R::Standard,
                APPOINTMENT_TIME,
                "Hi {{member.firstName}}, your appointment with {{user.firstName}} starts \
                 soon ({{appointmentTime}}).",
                "Hola {{member.firstName}}, tu cita con {{user.firstName}} comienza pronto \
                 ({{appointmentTime}}).",
            ),
            ContentKey::AppointmentLongReminder => (
                C::Appointment,
                R::Standard,
                APPOINTMENT_TIME,
                "Hi {{member.firstName}}, a reminder that you have an appointment with \
                 {{user.firstName}} on {{appointmentTime}}.",
                "Hola {{member.firstName}}, te recordamos que tienes una cita con \
                 {{user.firstName}} el {{appointmentTime}}.",
            ),
            ContentKey::AppointmentRequest => (
                C::Appointment,
                R::SmsOnly,
                &[ContentField::ScheduleLink],
                "Hi {{member.firstName}}, please schedule your appointment with \
                 {{user.firstName}}: {{scheduleLink}}",
                "Hola {{member.firstName}}, por favor programa tu cita con \
                 {{user.firstName}}: {{scheduleLink}}",
            ),
            ContentKey::NewChatMessageFromUser => (
                C::Chat,
                R::Standard,
                &[],
                "You have a new message from {{user.firstName}}.",
                "Tienes un nuevo mensaje de {{user.firstName}}.",
            ),
            ContentKey::NewChatMessageFromMember => (
                C::Chat,
                R::Standard,
                &[],
                "You have a new message from {{member.firstName}} {{member.lastName}}.",
                "Tienes un nuevo mensaje de {{member.firstName}} {{member.lastName}}.",
            ),
            ContentKey::MemberNotFeelingWellMessage => (
                C::Chat,
                R::Standard,
                &[],
                "{{member.firstName}} {{member.lastName}} reported not feeling well.",
                "{{member.firstName}} {{member.lastName}} reportó no sentirse bien.",
            ),
            ContentKey::JournalContent => (
                C::Journal,
                R::Standard,
                &[ContentField::Content],
                "{{content}}",
                "{{content}}",
            ),
            ContentKey::AssessmentSubmitAlert => (
                C::Assessment,
                R::Standard,
                &[ContentField::AssessmentName, ContentField::AssessmentScore],
                "{{member.firstName}} {{member.lastName}} submitted {{assessmentName}} \
                 with a score of {{assessmentScore}}.",
                "{{member.firstName}} {{member.lastName}} envió {{assessmentName}} \
                 con un puntaje de {{assessmentScore}}.",
            ),
            ContentKey::CreateTodo => (
                C::Todo,
                R::Standard,
                &[],
                "{{user.firstName}} added a new to-do for you.",
                "{{user.firstName}} agregó una nueva tarea para ti.",
            ),
            ContentKey::UpdateTodo => (
                C::Todo,
                R::Standard,
                &[],
                "{{user.firstName}} updated one of your to-dos.",
                "{{user.firstName}} actualizó una de tus tareas.",
            ),
            ContentKey::DeleteTodo => (
                C::Todo,
                R::Standard,
                &[],
                "{{user.firstName}} removed one of your to-dos.",
                "{{user.firstName}} eliminó una de tus tareas.",
            ),
            ContentKey::AddCaregiverDetails => (
                C::External,
                R::PushOnly,
                &[],
                "Please add your caregiver's details in the app.",
                "Por favor agrega los datos de tu cuidador en la app.",
            ),
            ContentKey::SetCallPermissions => (
                C::External,
                R::PushOnly,
                &[],
                "Please allow calls so {{user.firstName}} can reach you.",
                "Por favor permite las llamadas para que {{user.firstName}} pueda contactarte.",
            ),
            ContentKey::CustomContent => (
                C::Custom,
                R::Standard,
                &[ContentField::Content],
                "{{content}}",
                "{{content}}",
            ),
            ContentKey::CallOrVideo => (
                C::Custom,
                R::Standard,
                &[ContentField::PeerId],
                "{{user.firstName}} is calling you.",
                "{{user.firstName}} te está llamando.",
            ),
            ContentKey::CancelNotify => (C::Custom, R::Standard, &[], "", ""),
        };

        ContentEntry {
            category,
            route,
            required,
            en,
            es,
        }
    }

    pub fn category(self) -> ContentCategory {
        self.entry().category
    }

    /// Registration nudges are pointless once the member has logged in.
    pub fn is_login_nudge(self) -> bool {
        matches!(
            self,
            ContentKey::NewMemberNudge
                | ContentKey::NewRegisteredMemberNudge
                | ContentKey::NewRegisteredMemberLongNudge
        )
    }

    /// Reminders the member can opt out of via the appointment-reminder flag.
    pub fn is_appointment_reminder(self) -> bool {
        matches!(
            self,
            ContentKey::AppointmentReminder | ContentKey::AppointmentLongReminder
        )
    }
}
