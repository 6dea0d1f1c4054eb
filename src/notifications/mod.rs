pub mod channels;
pub mod dispatcher;
pub mod templates;
pub mod transport;

pub use channels::{ChannelConfig, ChannelType, FeedbackType, MessageTemplates, NotificationChannel};
pub use dispatcher::{build_outbound, run_dispatch_loop, DispatchReport, NotificationDispatcher};
pub use templates::{render, render_template, RenderedMessage};
pub use transport::{
    ChannelError, DeliveryTransport, LogTransport, NotificationTransport, OutboundNotification, SmtpSettings,
};
